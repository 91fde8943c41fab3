//! Session lifecycle
//!
//! The session gates the whole core: conversations and messages stay inert
//! until the gateway reports the phone as paired. Three recurring timers hang
//! off the lifecycle state, each bound to the states in which it may run:
//!
//! | Timer               | Runs while              | Default period |
//! |---------------------|-------------------------|----------------|
//! | QR refresh          | `qr_ready`              | 30 s           |
//! | Status poll         | `connecting`, `qr_ready`, `error` | 5 s  |
//! | Conversation poll   | `connected`             | 15 s           |

pub mod manager;

pub use manager::{SessionLifecycleManager, StopOutcome};

use crate::config::SyncConfig;
use crate::model::SessionState;
use std::time::Duration;

/// Recurring timers owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    QrRefresh,
    StatusPoll,
    ConversationPoll,
}

impl TimerKind {
    pub const ALL: [TimerKind; 3] = [
        TimerKind::QrRefresh,
        TimerKind::StatusPoll,
        TimerKind::ConversationPoll,
    ];

    /// Whether the timer may run in `state`
    pub fn runs_in(self, state: SessionState) -> bool {
        match self {
            TimerKind::QrRefresh => state == SessionState::QrReady,
            TimerKind::StatusPoll => state.needs_status_poll(),
            TimerKind::ConversationPoll => state.is_connected(),
        }
    }

    pub fn period(self, config: &SyncConfig) -> Duration {
        match self {
            TimerKind::QrRefresh => config.qr_refresh_interval(),
            TimerKind::StatusPoll => config.status_poll_interval(),
            TimerKind::ConversationPoll => config.conversation_poll_interval(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimerKind::QrRefresh => "qr-refresh",
            TimerKind::StatusPoll => "status-poll",
            TimerKind::ConversationPoll => "conversation-poll",
        }
    }
}
