//! Error handling for the synchronization core
//!
//! Every component returns [`Result`], an alias over [`SyncError`]. Network
//! failures are classified at the gateway seam so callers can decide between
//! "retry on the next tick" and "stop everything".
//!
//! ## Error Categories
//!
//! ### Network Errors
//! - `TransientNetwork`: timeouts, connection resets, 5xx. Retried by the next
//!   scheduled timer tick, never in a tight loop.
//! - `AuthExpired`: the gateway dropped the session. Forces the session to
//!   `disconnected` and halts every timer.
//! - `SendFailed`: a send was rejected (4xx) or timed out. The provisional
//!   message is marked `failed`.
//!
//! ### Local Errors
//! - `NotAuthenticated`: the session has not reached `connected`; the sync
//!   components are inert until it does.
//! - `InvalidState`: an operation was issued in the wrong session state.
//! - `MalformedRecord`: a record violated a local invariant (empty id, ...).
//!
//! ### Error Matching
//!
//! ```rust
//! use wacrm_sync_core::SyncError;
//!
//! fn describe(error: &SyncError) -> &'static str {
//!     match error {
//!         SyncError::AuthExpired(_) => "pair again",
//!         e if e.is_recoverable() => "will retry",
//!         _ => "failed",
//!     }
//! }
//!
//! assert_eq!(describe(&SyncError::TransientNetwork("timeout".into())), "will retry");
//! ```

use thiserror::Error;

/// Result type for synchronization operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur in the synchronization core
///
/// # Examples
///
/// ```rust
/// use wacrm_sync_core::SyncError;
///
/// let error = SyncError::ConversationNotFound("c-1".to_string());
/// assert_eq!(error.to_string(), "Conversation not found: c-1");
///
/// let error = SyncError::NotAuthenticated;
/// assert_eq!(error.to_string(), "Session not authenticated");
/// ```
#[derive(Error, Debug)]
pub enum SyncError {
    /// Timeout, connection failure or server-side (5xx) error
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// The gateway no longer recognises the session
    #[error("Session expired: {0}")]
    AuthExpired(String),

    /// The gateway rejected or timed out a message send
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Any other non-retryable gateway response (4xx)
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// The session has not been authenticated yet
    #[error("Session not authenticated")]
    NotAuthenticated,

    /// Operation is not valid in the current session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller supplied an unusable argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conversation is not in the store
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    /// Message is not in the conversation's list
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// A record violated a local invariant and was skipped
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Shorthand for [`SyncError::InvalidState`]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        SyncError::InvalidState(message.into())
    }

    /// Check if this error may succeed when the next timer tick retries it
    ///
    /// ```rust
    /// use wacrm_sync_core::SyncError;
    ///
    /// assert!(SyncError::TransientNetwork("502".into()).is_recoverable());
    /// assert!(!SyncError::AuthExpired("401".into()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SyncError::TransientNetwork(_) | SyncError::Io(_))
    }

    /// Check if this error ends the session
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, SyncError::AuthExpired(_))
    }

    /// Check if this error cannot be resolved without the user
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            SyncError::AuthExpired(_) | SyncError::NotAuthenticated | SyncError::InvalidInput(_)
        )
    }

    /// Get a user-friendly error message suitable for display in UI
    pub fn user_message(&self) -> String {
        match self {
            SyncError::TransientNetwork(_) => {
                "Connection to the gateway is unstable. Retrying shortly.".to_string()
            }
            SyncError::AuthExpired(_) => {
                "The WhatsApp session ended. Scan the QR code again to reconnect.".to_string()
            }
            SyncError::SendFailed(msg) => format!("Message not sent: {}. Tap to retry.", msg),
            SyncError::Gateway(msg) => format!("Gateway rejected the request: {}.", msg),
            SyncError::NotAuthenticated => {
                "Not connected. Pair a phone before using conversations.".to_string()
            }
            SyncError::InvalidState(msg) => format!("Not possible right now: {}.", msg),
            SyncError::InvalidInput(msg) => format!("Invalid input: {}.", msg),
            SyncError::ConversationNotFound(id) => format!("Conversation '{}' not found.", id),
            SyncError::MessageNotFound(id) => format!("Message '{}' not found.", id),
            SyncError::MalformedRecord(msg) => format!("Skipped invalid data: {}.", msg),
            SyncError::Json(e) => format!("Data format error: {}.", e),
            SyncError::Io(e) => format!("I/O error: {}.", e),
        }
    }
}

/// Report a record that violates a local invariant.
///
/// Panics in debug builds so the bug surfaces during development; release
/// builds log it and the caller skips the record.
pub(crate) fn malformed(what: &str, detail: &str) -> SyncError {
    tracing::error!("Skipping malformed {}: {}", what, detail);
    debug_assert!(false, "malformed {}: {}", what, detail);
    SyncError::MalformedRecord(format!("{}: {}", what, detail))
}
