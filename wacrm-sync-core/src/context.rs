//! Shared synchronization context
//!
//! [`SyncContext`] is passed explicitly to every component instead of living
//! in global state. It is cheap to clone: every field is reference counted.
//!
//! The context also tracks the active conversation together with a
//! generation counter. Loads capture a [`RequestToken`] before going to the
//! network and compare it when the response arrives; switching conversations
//! bumps the generation, so late responses for the previous conversation are
//! discarded instead of applied.

use crate::config::SyncConfig;
use crate::conversations::ConversationStore;
use crate::events::SyncEvent;
use crate::gateway::Gateway;
use crate::messages::MessageList;
use crate::model::SessionState;
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Per-conversation message state
#[derive(Debug)]
pub struct ConversationThread {
    /// Messages in display order
    pub messages: MessageList,
    /// Whether older pages may exist on the server
    pub has_more_history: bool,
    /// Whether a backward load is in flight
    pub loading_earlier: bool,
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self {
            messages: MessageList::new(),
            has_more_history: true,
            loading_earlier: false,
        }
    }
}

/// Message lists of every conversation seen so far
#[derive(Debug, Default)]
pub struct MessageStore {
    threads: HashMap<String, ConversationThread>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a conversation's thread
    pub fn thread(&self, conversation_id: &str) -> Option<&ConversationThread> {
        self.threads.get(conversation_id)
    }

    /// Get a conversation's thread, creating it if needed
    pub fn thread_mut(&mut self, conversation_id: &str) -> &mut ConversationThread {
        self.threads
            .entry(conversation_id.to_string())
            .or_default()
    }

    /// Get a conversation's thread without creating it
    pub fn existing_thread_mut(&mut self, conversation_id: &str) -> Option<&mut ConversationThread> {
        self.threads.get_mut(conversation_id)
    }

    /// Drop a conversation's messages
    pub fn remove(&mut self, conversation_id: &str) -> Option<ConversationThread> {
        self.threads.remove(conversation_id)
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }
}

/// Active conversation and its generation
#[derive(Debug, Default)]
struct ActiveConversation {
    id: Option<String>,
    generation: u64,
}

/// Token captured when a load starts, checked when its response is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestToken {
    conversation_id: String,
    generation: u64,
}

impl RequestToken {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

/// Explicit context shared by all components
#[derive(Debug, Clone)]
pub struct SyncContext {
    gateway: Arc<dyn Gateway>,
    config: Arc<SyncConfig>,
    conversations: Arc<RwLock<ConversationStore>>,
    messages: Arc<RwLock<MessageStore>>,
    active: Arc<RwLock<ActiveConversation>>,
    session_state: Arc<watch::Sender<SessionState>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncContext {
    /// Create a new context around a gateway
    pub fn new(gateway: Arc<dyn Gateway>, config: SyncConfig) -> Self {
        let (session_state, _) = watch::channel(SessionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            gateway,
            config: Arc::new(config.validate()),
            conversations: Arc::new(RwLock::new(ConversationStore::new())),
            messages: Arc::new(RwLock::new(MessageStore::new())),
            active: Arc::new(RwLock::new(ActiveConversation::default())),
            session_state: Arc::new(session_state),
            event_tx,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn conversations(&self) -> &Arc<RwLock<ConversationStore>> {
        &self.conversations
    }

    pub fn messages(&self) -> &Arc<RwLock<MessageStore>> {
        &self.messages
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event; having no subscribers is not an error
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Current session state
    pub fn session_state(&self) -> SessionState {
        *self.session_state.borrow()
    }

    /// Watch session state changes
    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.session_state.subscribe()
    }

    pub(crate) fn publish_session_state(&self, state: SessionState) {
        self.session_state.send_replace(state);
    }

    /// Fail unless the session is authenticated
    pub fn ensure_authenticated(&self) -> Result<()> {
        if self.session_state().is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotAuthenticated)
        }
    }

    /// Currently active conversation
    pub async fn active_conversation(&self) -> Option<String> {
        self.active.read().await.id.clone()
    }

    /// Whether `conversation_id` is the active conversation
    pub async fn is_active(&self, conversation_id: &str) -> bool {
        self.active.read().await.id.as_deref() == Some(conversation_id)
    }

    /// Change the active conversation, invalidating in-flight loads
    pub async fn set_active(&self, conversation_id: Option<String>) -> u64 {
        let mut active = self.active.write().await;
        active.generation += 1;
        debug!(
            "Active conversation {:?} -> {:?} (generation {})",
            active.id, conversation_id, active.generation
        );
        active.id = conversation_id;
        active.generation
    }

    /// Capture a token for a load about to start
    pub async fn request_token(&self, conversation_id: &str) -> RequestToken {
        RequestToken {
            conversation_id: conversation_id.to_string(),
            generation: self.active.read().await.generation,
        }
    }

    /// Whether a response for `token` may still be applied
    pub async fn is_current(&self, token: &RequestToken) -> bool {
        self.active.read().await.generation == token.generation
    }

    /// Drop all conversation and message state
    pub async fn reset(&self) {
        self.conversations.write().await.clear();
        self.messages.write().await.clear();
        self.set_active(None).await;
        self.emit(SyncEvent::ConversationsChanged);
    }
}
