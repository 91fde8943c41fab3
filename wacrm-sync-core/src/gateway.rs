//! Gateway Abstraction
//!
//! Defines the interface the core consumes from the messaging gateway. The
//! transport (REST, WebSocket, SSE) is left to the implementation; the daemon
//! ships an HTTP one and tests use an in-memory mock.

use crate::model::{Conversation, ConversationPatch, Message, MessageCursor, SessionState};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Response of `GET session/status` and of the session mutation endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl StatusResponse {
    /// Status carrying a fresh pairing payload
    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            state: SessionState::QrReady,
            qr_payload: Some(payload.into()),
            phone_number: None,
        }
    }

    /// Status of a paired session
    pub fn connected(phone_number: impl Into<String>) -> Self {
        Self {
            state: SessionState::Connected,
            qr_payload: None,
            phone_number: Some(phone_number.into()),
        }
    }

    /// Status without payload
    pub fn bare(state: SessionState) -> Self {
        Self {
            state,
            qr_payload: None,
            phone_number: None,
        }
    }
}

/// Body of `POST messages/send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub conversation_id: String,
    pub body: String,
    /// Correlation token, the client temp id
    pub client_message_id: String,
}

/// Response of `POST messages/send`
///
/// Gateways that do not echo the message id leave `id` empty and the
/// reconciler falls back to matching against the conversation tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub timestamp_ms: Option<i64>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

/// Real-time event delivered over the push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PushEvent {
    /// A new or updated message
    #[serde(rename_all = "camelCase")]
    Message {
        conversation_id: String,
        message: Message,
    },
    /// Conversation metadata changed server-side
    #[serde(rename_all = "camelCase")]
    ConversationUpdate {
        conversation_id: String,
        patch: ConversationPatch,
    },
}

impl PushEvent {
    /// Conversation this event belongs to
    pub fn conversation_id(&self) -> &str {
        match self {
            PushEvent::Message {
                conversation_id, ..
            } => conversation_id,
            PushEvent::ConversationUpdate {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

/// Messaging gateway consumed by the core
///
/// Implementations classify failures into [`crate::SyncError`] variants:
/// timeouts and 5xx as `TransientNetwork`, a dropped session as
/// `AuthExpired`, rejected sends as `SendFailed`.
#[async_trait]
pub trait Gateway: Send + Sync + Debug {
    /// `GET session/status`
    async fn status(&self) -> Result<StatusResponse>;

    /// `POST session/start`
    async fn start_session(&self) -> Result<StatusResponse>;

    /// `POST session/refresh-qr`
    async fn refresh_qr(&self) -> Result<StatusResponse>;

    /// `POST session/stop`
    async fn stop_session(&self, force: bool) -> Result<()>;

    /// `GET conversations`
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// `GET conversations/{id}/messages?before=<cursor>&limit=<n>`
    ///
    /// Returns the page oldest-first. Without a cursor the most recent page
    /// is returned.
    async fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// `POST messages/send`
    async fn send_message(&self, request: SendRequest) -> Result<SendResponse>;
}
