//! Sync Event System
//!
//! Events emitted by the core for observers (UI layer, daemon logging). The
//! UI never receives errors from component calls; it watches these events and
//! the state fields they describe.

use crate::model::SessionState;

/// Events emitted by the synchronization core
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Session moved to a new lifecycle state
    SessionStateChanged {
        /// Previous state
        from: SessionState,
        /// New state
        to: SessionState,
    },

    /// A new QR payload should be rendered
    QrUpdated {
        /// Opaque payload
        payload: String,
    },

    /// Conversation list changed (upsert, update or removal)
    ConversationsChanged,

    /// A message was added to or updated in a conversation
    MessagesChanged {
        /// Conversation id
        conversation_id: String,
    },

    /// A message arrived in the active conversation
    AutoScrollRequested {
        /// Conversation id
        conversation_id: String,
        /// Whether the message is our own
        outgoing: bool,
    },

    /// An optimistic send was reconciled with its server copy
    SendConfirmed {
        conversation_id: String,
        client_temp_id: String,
        message_id: String,
    },

    /// An optimistic send failed and can be retried
    SendFailed {
        conversation_id: String,
        client_temp_id: String,
        reason: String,
    },

    /// No older history is available for a conversation
    HistoryExhausted {
        conversation_id: String,
    },

    /// An operation failed at the component boundary
    Error {
        /// Conversation id (if applicable)
        conversation_id: Option<String>,
        /// User-facing message
        message: String,
    },
}

impl SyncEvent {
    /// Check if this is a session state change
    pub fn is_session_change(&self) -> bool {
        matches!(self, SyncEvent::SessionStateChanged { .. })
    }

    /// Get conversation ID if this event is conversation-related
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            SyncEvent::MessagesChanged { conversation_id }
            | SyncEvent::AutoScrollRequested {
                conversation_id, ..
            }
            | SyncEvent::SendConfirmed {
                conversation_id, ..
            }
            | SyncEvent::SendFailed {
                conversation_id, ..
            }
            | SyncEvent::HistoryExhausted { conversation_id } => Some(conversation_id),
            SyncEvent::Error {
                conversation_id, ..
            } => conversation_id.as_deref(),
            SyncEvent::SessionStateChanged { .. }
            | SyncEvent::QrUpdated { .. }
            | SyncEvent::ConversationsChanged => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_checking() {
        let change = SyncEvent::SessionStateChanged {
            from: SessionState::QrReady,
            to: SessionState::Connected,
        };
        assert!(change.is_session_change());
        assert!(!SyncEvent::ConversationsChanged.is_session_change());
    }

    #[test]
    fn test_conversation_id_extraction() {
        let event = SyncEvent::SendFailed {
            conversation_id: "c1".to_string(),
            client_temp_id: "tmp-1".to_string(),
            reason: "413".to_string(),
        };
        assert_eq!(event.conversation_id(), Some("c1"));

        let error = SyncEvent::Error {
            conversation_id: None,
            message: "offline".to_string(),
        };
        assert_eq!(error.conversation_id(), None);
    }
}
