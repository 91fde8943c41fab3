//! Data model shared by every component
//!
//! Records mirror the gateway's JSON (camelCase field names). Timestamps are
//! UNIX epoch milliseconds.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current UNIX timestamp in milliseconds
pub fn current_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Connection lifecycle state of the gateway session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session exists (initial state, or after stop)
    #[default]
    Disconnected,
    /// A pairing flow was requested and no payload arrived yet
    Connecting,
    /// A QR payload is available for scanning
    QrReady,
    /// The phone is paired and the session is authenticated
    Connected,
    /// The pairing flow failed
    Error,
}

impl SessionState {
    /// Whether the session is authenticated
    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }

    /// Whether the status probe should run in this state
    ///
    /// It runs while a session exists but is not connected.
    pub fn needs_status_poll(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::QrReady | SessionState::Error
        )
    }

    /// Check whether the state machine allows moving to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (a, b) if a == b => true,
            (_, Disconnected) => true,
            (Disconnected, Error) => false,
            (_, Error) => true,
            (Disconnected, Connecting) | (Error, Connecting) => true,
            (Connecting, QrReady) | (Connecting, Connected) => true,
            (QrReady, Connected) | (QrReady, Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::QrReady => "qr_ready",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Local view of the gateway session
///
/// `qr_payload` is only set in [`SessionState::QrReady`] and `phone_number`
/// only from [`SessionState::Connected`] onward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Gateway instance id
    pub id: String,
    /// Lifecycle state
    pub state: SessionState,
    /// Paired phone number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Opaque QR payload to render
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    /// First time the session reached `connected` (ms since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_at: Option<i64>,
    /// Last failure reported by the gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SessionInfo {
    /// Create a disconnected session record
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Whether the session was ever authenticated
    pub fn was_authenticated(&self) -> bool {
        self.authenticated_at.is_some()
    }
}

/// Conversation (chat) record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Remote conversation id, stable across syncs
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_group: bool,
    /// Preview of the latest message
    #[serde(default)]
    pub last_message_summary: String,
    /// Timestamp of the latest message (ms since epoch)
    #[serde(default)]
    pub last_activity_at: i64,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub blocked: bool,
}

impl Conversation {
    /// Create an empty conversation record
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            is_group: false,
            last_message_summary: String::new(),
            last_activity_at: 0,
            unread_count: 0,
            pinned: false,
            muted: false,
            archived: false,
            blocked: false,
        }
    }

    /// Whether the conversation shows up in the default list
    pub fn is_visible(&self) -> bool {
        !self.archived && !self.blocked
    }
}

/// Partial update of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl ConversationPatch {
    /// Patch that resets the unread counter
    pub fn mark_read() -> Self {
        Self {
            unread_count: Some(0),
            ..Default::default()
        }
    }

    /// Patch that pins or unpins
    pub fn pinned(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Default::default()
        }
    }

    /// Patch that archives or unarchives
    pub fn archived(archived: bool) -> Self {
        Self {
            archived: Some(archived),
            ..Default::default()
        }
    }

    /// Patch that mutes or unmutes
    pub fn muted(muted: bool) -> Self {
        Self {
            muted: Some(muted),
            ..Default::default()
        }
    }

    /// Patch that blocks or unblocks
    pub fn blocked(blocked: bool) -> Self {
        Self {
            blocked: Some(blocked),
            ..Default::default()
        }
    }

    /// Apply the patch to a conversation
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(name) = &self.display_name {
            conversation.display_name = name.clone();
        }
        if let Some(summary) = &self.last_message_summary {
            conversation.last_message_summary = summary.clone();
        }
        if let Some(at) = self.last_activity_at {
            conversation.last_activity_at = at;
        }
        if let Some(unread) = self.unread_count {
            conversation.unread_count = unread;
        }
        if let Some(pinned) = self.pinned {
            conversation.pinned = pinned;
        }
        if let Some(muted) = self.muted {
            conversation.muted = muted;
        }
        if let Some(archived) = self.archived {
            conversation.archived = archived;
        }
        if let Some(blocked) = self.blocked {
            conversation.blocked = blocked;
        }
    }
}

/// Message direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the contact
    In,
    /// Sent by us
    Out,
}

/// Delivery state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Optimistically inserted, not confirmed yet
    Pending,
    Sent,
    Delivered,
    Read,
    /// Send was rejected or timed out
    Failed,
    /// Inbound message
    Received,
}

impl DeliveryState {
    /// Position in the outbound progression, `None` for states outside it
    fn outbound_rank(self) -> Option<u8> {
        match self {
            DeliveryState::Pending => Some(0),
            DeliveryState::Sent => Some(1),
            DeliveryState::Delivered => Some(2),
            DeliveryState::Read => Some(3),
            DeliveryState::Failed | DeliveryState::Received => None,
        }
    }

    /// Merge a redelivered state into the stored one without regressing it
    pub fn advance(self, incoming: DeliveryState) -> DeliveryState {
        match (self.outbound_rank(), incoming.outbound_rank()) {
            (Some(current), Some(next)) if next > current => incoming,
            // The gateway confirmed a send we had given up on
            (None, Some(next)) if self == DeliveryState::Failed && next > 0 => incoming,
            _ => self,
        }
    }
}

/// Message record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, or the client temp id while provisional
    pub id: String,
    pub conversation_id: String,
    pub body: String,
    pub timestamp_ms: i64,
    pub direction: Direction,
    pub delivery_state: DeliveryState,
    /// Correlation token of an optimistic send
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

impl Message {
    /// Inbound message
    pub fn inbound(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        body: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            conversation_id: conversation_id.into(),
            body: body.into(),
            timestamp_ms,
            direction: Direction::In,
            delivery_state: DeliveryState::Received,
            client_temp_id: None,
        }
    }

    /// Outbound message confirmed by the gateway
    pub fn outbound(
        id: impl Into<String>,
        conversation_id: impl Into<String>,
        body: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            direction: Direction::Out,
            delivery_state: DeliveryState::Sent,
            ..Self::inbound(id, conversation_id, body, timestamp_ms)
        }
    }

    /// Optimistic message keyed by its temp id
    pub fn provisional(
        client_temp_id: impl Into<String>,
        conversation_id: impl Into<String>,
        body: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        let temp_id = client_temp_id.into();
        Self {
            id: temp_id.clone(),
            conversation_id: conversation_id.into(),
            body: body.into(),
            timestamp_ms,
            direction: Direction::Out,
            delivery_state: DeliveryState::Pending,
            client_temp_id: Some(temp_id),
        }
    }

    /// Whether this entry still carries its temp id instead of a server id
    pub fn is_provisional(&self) -> bool {
        self.client_temp_id.as_deref() == Some(self.id.as_str())
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::In
    }
}

/// Pointer to the oldest loaded message, used to request older pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCursor {
    pub before_timestamp_ms: i64,
    pub before_id: String,
}

impl MessageCursor {
    /// Cursor pointing before `message`
    pub fn before(message: &Message) -> Self {
        Self {
            before_timestamp_ms: message.timestamp_ms,
            before_id: message.id.clone(),
        }
    }
}
