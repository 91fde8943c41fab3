//! Sync Service
//!
//! UI-facing boundary of the core. Owns every component over one shared
//! [`SyncContext`], dispatches push events, routes scroll signals and
//! switches the active conversation. Opening a conversation also resets the
//! scroll tracker, so the first page always lands at the newest message.
//!
//! Operations triggered by the UI or the push channel never hand errors back:
//! failures are logged and published as [`SyncEvent::Error`], and the UI
//! reacts to the state it observes. Direct calls that produce a value
//! (`send`, `apply_update`) still return their `Result`.
//!
//! An expired session reported by any call ends the session: it goes to
//! `disconnected` and every timer stops.

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::gateway::{Gateway, PushEvent};
use crate::messages::{IngestOutcome, LoadOutcome, MessageSyncEngine};
use crate::model::{Conversation, ConversationPatch, Message};
use crate::pagination::{HistoryPaginator, PageOutcome};
use crate::scroll::{ScrollMetrics, ScrollPositionTracker, ScrollSignal};
use crate::send::{OptimisticSendReconciler, SendReceipt};
use crate::session::SessionLifecycleManager;
use crate::{Result, SyncError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

/// Facade over the synchronization components
#[derive(Debug, Clone)]
pub struct SyncService {
    ctx: SyncContext,
    session: SessionLifecycleManager,
    engine: MessageSyncEngine,
    sender: OptimisticSendReconciler,
    paginator: HistoryPaginator,
    scroll: Arc<Mutex<ScrollPositionTracker>>,
    scroll_signals: Arc<Mutex<Option<mpsc::UnboundedReceiver<ScrollSignal>>>>,
}

impl SyncService {
    /// Create the service; must be called from within a Tokio runtime
    pub fn new(gateway: Arc<dyn Gateway>, config: SyncConfig, instance_id: impl Into<String>) -> Self {
        let (scroll, scroll_signals) = ScrollPositionTracker::new(&config);
        let ctx = SyncContext::new(gateway, config);
        let engine = MessageSyncEngine::new(ctx.clone());

        Self {
            scroll: Arc::new(Mutex::new(scroll)),
            scroll_signals: Arc::new(Mutex::new(Some(scroll_signals))),
            session: SessionLifecycleManager::new(ctx.clone(), instance_id),
            sender: OptimisticSendReconciler::new(ctx.clone()),
            paginator: HistoryPaginator::new(ctx.clone(), engine.clone()),
            engine,
            ctx,
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn session(&self) -> &SessionLifecycleManager {
        &self.session
    }

    pub fn engine(&self) -> &MessageSyncEngine {
        &self.engine
    }

    pub fn sender(&self) -> &OptimisticSendReconciler {
        &self.sender
    }

    pub fn paginator(&self) -> &HistoryPaginator {
        &self.paginator
    }

    /// Subscribe to sync events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.ctx.subscribe()
    }

    /// Dispatch an event from the push channel
    pub async fn handle_push(&self, event: PushEvent) {
        match event {
            PushEvent::Message {
                conversation_id,
                message,
            } => {
                if let Err(e) = self.engine.ingest(&conversation_id, message).await {
                    self.report(Some(&conversation_id), &e).await;
                }
            }
            PushEvent::ConversationUpdate {
                conversation_id,
                patch,
            } => {
                if let Err(e) = self.ctx.ensure_authenticated() {
                    self.report(Some(&conversation_id), &e).await;
                    return;
                }

                let result = self
                    .ctx
                    .conversations()
                    .write()
                    .await
                    .apply_remote_patch(&conversation_id, &patch);
                match result {
                    Ok(_) => self.ctx.emit(SyncEvent::ConversationsChanged),
                    Err(e) => self.report(Some(&conversation_id), &e).await,
                }
            }
        }
    }

    /// Ingest a live message outside the push channel (poll results)
    pub async fn ingest(&self, conversation_id: &str, message: Message) -> Option<IngestOutcome> {
        match self.engine.ingest(conversation_id, message).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.report(Some(conversation_id), &e).await;
                None
            }
        }
    }

    /// Make `conversation_id` the active conversation and load its latest page
    pub async fn open_conversation(&self, conversation_id: &str) -> Option<LoadOutcome> {
        info!("Opening conversation {}", conversation_id);
        self.ctx.set_active(Some(conversation_id.to_string())).await;
        self.scroll.lock().await.switch_conversation(conversation_id);

        match self.engine.load_initial(conversation_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.report(Some(conversation_id), &e).await;
                None
            }
        }
    }

    /// Leave the active conversation
    pub async fn close_conversation(&self) {
        self.ctx.set_active(None).await;
        self.scroll.lock().await.clear();
    }

    /// Receiver for the scroll tracker's signals; handed out once
    pub async fn take_scroll_signals(&self) -> Option<mpsc::UnboundedReceiver<ScrollSignal>> {
        self.scroll_signals.lock().await.take()
    }

    /// Feed the viewport geometry of the open conversation
    pub async fn update_scroll(&self, metrics: ScrollMetrics) {
        self.scroll.lock().await.update(metrics);
    }

    /// The first page of `conversation_id` was rendered
    pub async fn initial_page_rendered(&self, conversation_id: &str) -> bool {
        self.scroll.lock().await.initial_page_rendered(conversation_id)
    }

    /// A message was appended to the open conversation
    pub async fn message_appended(&self, outgoing: bool) -> bool {
        self.scroll.lock().await.on_new_message(outgoing)
    }

    /// `(is_user_scrolling, should_auto_scroll)` of the open conversation
    pub async fn scroll_state(&self) -> (bool, bool) {
        let scroll = self.scroll.lock().await;
        (scroll.is_user_scrolling(), scroll.should_auto_scroll())
    }

    /// Load older messages of a conversation
    pub async fn load_earlier(&self, conversation_id: &str) -> Option<PageOutcome> {
        match self.paginator.load_earlier(conversation_id).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                self.report(Some(conversation_id), &e).await;
                None
            }
        }
    }

    /// Route a signal from the scroll tracker
    pub async fn handle_scroll_signal(&self, signal: ScrollSignal) -> Option<PageOutcome> {
        match signal {
            ScrollSignal::NearTop { conversation_id } => {
                if !self.ctx.is_active(&conversation_id).await {
                    debug!("Ignoring near-top signal for inactive {}", conversation_id);
                    return None;
                }
                self.load_earlier(&conversation_id).await
            }
            ScrollSignal::UserScrollingChanged(_)
            | ScrollSignal::AutoScrollChanged(_)
            | ScrollSignal::ScrollToBottom { .. } => None,
        }
    }

    /// Send a text message
    pub async fn send(&self, conversation_id: &str, body: &str) -> Result<SendReceipt> {
        let result = self.sender.send(conversation_id, body).await;
        if let Err(e) = &result {
            self.report(Some(conversation_id), e).await;
        }
        result
    }

    /// Retry a failed send
    pub async fn retry_send(&self, conversation_id: &str, client_temp_id: &str) -> Result<SendReceipt> {
        let result = self.sender.retry(conversation_id, client_temp_id).await;
        if let Err(e) = &result {
            self.report(Some(conversation_id), e).await;
        }
        result
    }

    /// Apply a local conversation change
    pub async fn apply_update(
        &self,
        conversation_id: &str,
        patch: &ConversationPatch,
    ) -> Result<Conversation> {
        self.ctx.ensure_authenticated()?;

        let updated = self
            .ctx
            .conversations()
            .write()
            .await
            .apply_update(conversation_id, patch)?;
        self.ctx.emit(SyncEvent::ConversationsChanged);
        Ok(updated)
    }

    /// Reset a conversation's unread counter
    pub async fn mark_read(&self, conversation_id: &str) -> Result<Conversation> {
        self.apply_update(conversation_id, &ConversationPatch::mark_read())
            .await
    }

    /// Default conversation list
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.ctx.conversations().read().await.sorted_view()
    }

    /// Archived conversations
    pub async fn archived_conversations(&self) -> Vec<Conversation> {
        self.ctx.conversations().read().await.archived_view()
    }

    /// Messages of a conversation in display order
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.engine.messages(conversation_id).await
    }

    pub async fn has_more_history(&self, conversation_id: &str) -> bool {
        self.engine.has_more_history(conversation_id).await
    }

    async fn report(&self, conversation_id: Option<&str>, error: &SyncError) {
        if matches!(error, SyncError::NotAuthenticated) {
            debug!("Ignored while not authenticated: {:?}", conversation_id);
            return;
        }
        if error.is_auth_expired() {
            self.session.handle_failure(error).await;
            return;
        }

        warn!("Sync operation failed: {}", error);
        self.ctx.emit(SyncEvent::Error {
            conversation_id: conversation_id.map(str::to_string),
            message: error.user_message(),
        });
    }
}
