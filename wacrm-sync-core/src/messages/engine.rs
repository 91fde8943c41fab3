//! Message Sync Engine
//!
//! Merges messages from the push channel, initial loads and history pages
//! into the per-conversation [`MessageList`]s. Every source goes through
//! [`MessageSyncEngine::ingest_with_origin`], so de-duplication by id and the
//! delivery-state rules are the same regardless of where a record came from.
//!
//! Live arrivals carry side effects that history pages must not have:
//! inbound messages bump the unread counter of a conversation that is not on
//! screen, and any message for the active conversation asks the UI to scroll.

use crate::context::SyncContext;
use crate::error::malformed;
use crate::events::SyncEvent;
use crate::messages::list::{InsertOutcome, ReconcileOutcome};
use crate::messages::MessageList;
use crate::model::{Direction, Message};
use crate::Result;
use tracing::{debug, info, warn};

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOrigin {
    /// Push channel or poll: counts as a new arrival
    Live,
    /// Backward history page: no unread or scroll side effects
    History,
}

/// Result of ingesting one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Added to the list
    Inserted,
    /// Already known, nothing changed
    Duplicate,
    /// Already known, delivery state advanced
    Updated,
    /// Replaced the provisional entry of an optimistic send
    Reconciled,
    /// Rejected (blocked conversation)
    Dropped,
}

/// Result of an initial load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Page applied; number of messages fetched
    Loaded(usize),
    /// The active conversation changed while loading; nothing applied
    Stale,
}

/// Feeds conversation message lists
#[derive(Debug, Clone)]
pub struct MessageSyncEngine {
    ctx: SyncContext,
}

impl MessageSyncEngine {
    pub fn new(ctx: SyncContext) -> Self {
        Self { ctx }
    }

    /// Ingest a live message (push or poll)
    pub async fn ingest(&self, conversation_id: &str, message: Message) -> Result<IngestOutcome> {
        self.ctx.ensure_authenticated()?;
        self.ingest_with_origin(conversation_id, message, IngestOrigin::Live)
            .await
    }

    /// Ingest a message from any source
    pub async fn ingest_with_origin(
        &self,
        conversation_id: &str,
        mut message: Message,
        origin: IngestOrigin,
    ) -> Result<IngestOutcome> {
        if message.id.is_empty() {
            return Err(malformed("message", "empty id"));
        }
        if conversation_id.is_empty() {
            return Err(malformed("message", "empty conversation id"));
        }
        if message.conversation_id != conversation_id {
            warn!(
                "Message {} claims conversation {}, filing under {}",
                message.id, message.conversation_id, conversation_id
            );
            message.conversation_id = conversation_id.to_string();
        }

        let blocked = self
            .ctx
            .conversations()
            .read()
            .await
            .get(conversation_id)
            .map(|c| c.blocked)
            .unwrap_or(false);
        if blocked && origin == IngestOrigin::Live && message.is_inbound() {
            info!(
                "Dropping message {} for blocked conversation {}",
                message.id, conversation_id
            );
            return Ok(IngestOutcome::Dropped);
        }

        let is_active = self.ctx.is_active(conversation_id).await;
        let inbound = message.is_inbound();

        let outcome = {
            let mut store = self.ctx.messages().write().await;
            let list = &mut store.thread_mut(conversation_id).messages;
            Self::merge(list, message.clone())
        };

        match outcome {
            IngestOutcome::Inserted => {
                {
                    let mut conversations = self.ctx.conversations().write().await;
                    conversations.record_activity(&message);
                    if origin == IngestOrigin::Live && inbound && !is_active {
                        let unread = conversations.increment_unread(conversation_id);
                        debug!("Conversation {} unread count {}", conversation_id, unread);
                    }
                }

                if origin == IngestOrigin::Live && is_active {
                    self.ctx.emit(SyncEvent::AutoScrollRequested {
                        conversation_id: conversation_id.to_string(),
                        outgoing: !inbound,
                    });
                }
                self.ctx.emit(SyncEvent::ConversationsChanged);
                self.ctx.emit(SyncEvent::MessagesChanged {
                    conversation_id: conversation_id.to_string(),
                });
            }
            IngestOutcome::Reconciled => {
                self.ctx
                    .conversations()
                    .write()
                    .await
                    .record_activity(&message);

                if let Some(client_temp_id) = message.client_temp_id.clone() {
                    self.ctx.emit(SyncEvent::SendConfirmed {
                        conversation_id: conversation_id.to_string(),
                        client_temp_id,
                        message_id: message.id.clone(),
                    });
                }
                self.ctx.emit(SyncEvent::MessagesChanged {
                    conversation_id: conversation_id.to_string(),
                });
            }
            IngestOutcome::Updated => {
                self.ctx.emit(SyncEvent::MessagesChanged {
                    conversation_id: conversation_id.to_string(),
                });
            }
            IngestOutcome::Duplicate | IngestOutcome::Dropped => {}
        }

        debug!(
            "Ingested message {} into {} ({:?}, {:?})",
            message.id, conversation_id, origin, outcome
        );
        Ok(outcome)
    }

    fn merge(list: &mut MessageList, message: Message) -> IngestOutcome {
        // Pushed echo of our own optimistic send
        if message.direction == Direction::Out {
            if let Some(temp_id) = message.client_temp_id.clone() {
                if temp_id != message.id && list.provisional(&temp_id).is_some() {
                    return match list.reconcile(&temp_id, message) {
                        ReconcileOutcome::Replaced | ReconcileOutcome::Merged => {
                            IngestOutcome::Reconciled
                        }
                        ReconcileOutcome::AlreadyReconciled | ReconcileOutcome::Missing => {
                            IngestOutcome::Duplicate
                        }
                    };
                }
            }
        }

        match list.insert(message) {
            InsertOutcome::Inserted => IngestOutcome::Inserted,
            InsertOutcome::Duplicate => IngestOutcome::Duplicate,
            InsertOutcome::Updated => IngestOutcome::Updated,
        }
    }

    /// Fetch the most recent page of a conversation and replace its list
    pub async fn load_initial(&self, conversation_id: &str) -> Result<LoadOutcome> {
        self.ctx.ensure_authenticated()?;

        let token = self.ctx.request_token(conversation_id).await;
        let page_size = self.ctx.config().page_size;

        debug!("Loading latest {} messages of {}", page_size, conversation_id);
        let page = self
            .ctx
            .gateway()
            .fetch_messages(conversation_id, None, page_size)
            .await?;

        if !self.ctx.is_current(&token).await {
            debug!(
                "Discarding stale initial page for {}",
                token.conversation_id()
            );
            return Ok(LoadOutcome::Stale);
        }

        let fetched = page.len();
        let page: Vec<Message> = page
            .into_iter()
            .filter_map(|mut message| {
                if message.id.is_empty() {
                    let _ = malformed("message", "empty id");
                    return None;
                }
                message.conversation_id = conversation_id.to_string();
                Some(message)
            })
            .collect();

        let newest = page.iter().max_by_key(|m| m.timestamp_ms).cloned();
        {
            let mut store = self.ctx.messages().write().await;
            let thread = store.thread_mut(conversation_id);
            thread.messages.replace_with(page);
            thread.has_more_history = true;
        }

        if let Some(newest) = newest {
            self.ctx
                .conversations()
                .write()
                .await
                .record_activity(&newest);
            self.ctx.emit(SyncEvent::ConversationsChanged);
        }
        self.ctx.emit(SyncEvent::MessagesChanged {
            conversation_id: conversation_id.to_string(),
        });

        info!("Loaded {} messages for {}", fetched, conversation_id);
        Ok(LoadOutcome::Loaded(fetched))
    }

    /// Snapshot of a conversation's messages in display order
    pub async fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.ctx
            .messages()
            .read()
            .await
            .thread(conversation_id)
            .map(|thread| thread.messages.to_vec())
            .unwrap_or_default()
    }

    /// Whether older pages may still exist for a conversation
    pub async fn has_more_history(&self, conversation_id: &str) -> bool {
        self.ctx
            .messages()
            .read()
            .await
            .thread(conversation_id)
            .map(|thread| thread.has_more_history)
            .unwrap_or(true)
    }
}
