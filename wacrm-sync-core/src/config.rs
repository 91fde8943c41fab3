//! Synchronization tuning
//!
//! Timer intervals, page sizes and scroll thresholds. Every field has a
//! default so a partial `[sync]` table in the daemon's TOML file is enough.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Bounds for the session status probe interval
const STATUS_POLL_MIN_SECS: u64 = 5;
const STATUS_POLL_MAX_SECS: u64 = 10;

/// Synchronization configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// QR payload refresh period while a code is displayed
    #[serde(default = "default_qr_refresh_interval")]
    pub qr_refresh_interval_secs: u64,

    /// Window in which a second QR refresh request is ignored
    #[serde(default = "default_qr_refresh_debounce")]
    pub qr_refresh_debounce_ms: u64,

    /// Session status probe period while not connected (5-10 seconds)
    #[serde(default = "default_status_poll_interval")]
    pub status_poll_interval_secs: u64,

    /// Conversation list refresh period while connected
    #[serde(default = "default_conversation_poll_interval")]
    pub conversation_poll_interval_secs: u64,

    /// Messages per history page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Messages fetched when reconciling a send without an echoed id
    #[serde(default = "default_tail_fetch_limit")]
    pub tail_fetch_limit: usize,

    /// Maximum distance between local and server timestamps for a fallback match
    #[serde(default = "default_send_match_tolerance")]
    pub send_match_tolerance_ms: i64,

    /// Distance from the bottom still considered "at the latest message"
    #[serde(default = "default_near_bottom_threshold")]
    pub near_bottom_threshold_px: f64,

    /// Distance from the top that triggers loading older history
    #[serde(default = "default_near_top_threshold")]
    pub near_top_threshold_px: f64,
}

fn default_qr_refresh_interval() -> u64 {
    30
}

fn default_qr_refresh_debounce() -> u64 {
    2000
}

fn default_status_poll_interval() -> u64 {
    5
}

fn default_conversation_poll_interval() -> u64 {
    15
}

fn default_page_size() -> usize {
    50
}

fn default_tail_fetch_limit() -> usize {
    20
}

fn default_send_match_tolerance() -> i64 {
    10_000
}

fn default_near_bottom_threshold() -> f64 {
    50.0
}

fn default_near_top_threshold() -> f64 {
    100.0
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            qr_refresh_interval_secs: default_qr_refresh_interval(),
            qr_refresh_debounce_ms: default_qr_refresh_debounce(),
            status_poll_interval_secs: default_status_poll_interval(),
            conversation_poll_interval_secs: default_conversation_poll_interval(),
            page_size: default_page_size(),
            tail_fetch_limit: default_tail_fetch_limit(),
            send_match_tolerance_ms: default_send_match_tolerance(),
            near_bottom_threshold_px: default_near_bottom_threshold(),
            near_top_threshold_px: default_near_top_threshold(),
        }
    }
}

impl SyncConfig {
    /// Get the QR refresh interval as Duration
    pub fn qr_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.qr_refresh_interval_secs)
    }

    /// Get the QR refresh debounce window as Duration
    pub fn qr_refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.qr_refresh_debounce_ms)
    }

    /// Get the status poll interval as Duration
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.status_poll_interval_secs)
    }

    /// Get the conversation poll interval as Duration
    pub fn conversation_poll_interval(&self) -> Duration {
        Duration::from_secs(self.conversation_poll_interval_secs)
    }

    /// Clamp values that would break the timers or paging
    pub fn validate(mut self) -> Self {
        let clamped = self
            .status_poll_interval_secs
            .clamp(STATUS_POLL_MIN_SECS, STATUS_POLL_MAX_SECS);
        if clamped != self.status_poll_interval_secs {
            warn!(
                "status_poll_interval_secs={} out of range, using {}",
                self.status_poll_interval_secs, clamped
            );
            self.status_poll_interval_secs = clamped;
        }

        if self.qr_refresh_interval_secs == 0 {
            warn!("qr_refresh_interval_secs=0 is invalid, using default");
            self.qr_refresh_interval_secs = default_qr_refresh_interval();
        }
        if self.conversation_poll_interval_secs == 0 {
            warn!("conversation_poll_interval_secs=0 is invalid, using default");
            self.conversation_poll_interval_secs = default_conversation_poll_interval();
        }
        self.page_size = self.page_size.max(1);
        self.tail_fetch_limit = self.tail_fetch_limit.max(1);

        self
    }
}
