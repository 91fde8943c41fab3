//! WhatsApp CRM Sync Core
//!
//! Session lifecycle and conversation synchronization for a CRM front end
//! talking to a WhatsApp-style messaging gateway: pairing by QR code,
//! conversation list sync, message history pagination and optimistic sends.
//!
//! The core is transport-agnostic. It consumes a [`Gateway`] implementation
//! and publishes [`SyncEvent`]s; [`SyncService`] ties the components together
//! for a UI or a daemon.

pub mod config;
pub mod context;
pub mod conversations;
pub mod events;
pub mod gateway;
pub mod messages;
pub mod model;
pub mod pagination;
pub mod scroll;
pub mod send;
pub mod service;
pub mod session;
pub mod timer;

mod error;

pub use config::SyncConfig;
pub use context::{ConversationThread, MessageStore, RequestToken, SyncContext};
pub use conversations::{ConversationStore, UpsertSummary};
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use gateway::{Gateway, PushEvent, SendRequest, SendResponse, StatusResponse};
pub use messages::{
    IngestOrigin, IngestOutcome, InsertOutcome, LoadOutcome, MessageList, MessageSyncEngine,
    ReconcileOutcome,
};
pub use model::{
    current_timestamp, Conversation, ConversationPatch, DeliveryState, Direction, Message,
    MessageCursor, SessionInfo, SessionState,
};
pub use pagination::{HistoryPaginator, PageOutcome};
pub use scroll::{ScrollMetrics, ScrollPositionTracker, ScrollSignal};
pub use send::{OptimisticSendReconciler, PendingSend, SendOutcome, SendReceipt};
pub use service::SyncService;
pub use session::{SessionLifecycleManager, StopOutcome, TimerKind};
pub use timer::{RecurringTimer, TickFlow};

#[cfg(test)]
pub mod test_utils;
