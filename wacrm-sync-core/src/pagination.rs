//! History Paginator
//!
//! Loads older pages of a conversation on demand, keyed by a cursor on the
//! oldest server-confirmed message. At most one backward load runs per
//! conversation; triggers that arrive while one is in flight are ignored.

use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::messages::{IngestOrigin, IngestOutcome, MessageSyncEngine};
use crate::model::MessageCursor;
use crate::Result;
use tracing::{debug, info};

/// Result of a backward load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Page merged; number of messages that were new
    Loaded { count: usize },
    /// Gateway returned an empty page; no further loads will be issued
    Exhausted,
    /// Another load for this conversation is in flight
    InFlight,
    /// History was already exhausted
    NoMoreHistory,
    /// Nothing loaded yet to page back from
    NoCursor,
    /// The active conversation changed while loading; nothing applied
    Stale,
}

/// Cursor-based backward loading
#[derive(Debug, Clone)]
pub struct HistoryPaginator {
    ctx: SyncContext,
    engine: MessageSyncEngine,
}

impl HistoryPaginator {
    pub fn new(ctx: SyncContext, engine: MessageSyncEngine) -> Self {
        Self { ctx, engine }
    }

    /// Load the page preceding the oldest loaded message
    pub async fn load_earlier(&self, conversation_id: &str) -> Result<PageOutcome> {
        self.ctx.ensure_authenticated()?;

        let cursor = {
            let mut store = self.ctx.messages().write().await;
            let thread = store.thread_mut(conversation_id);

            if thread.loading_earlier {
                debug!("Backward load for {} already in flight", conversation_id);
                return Ok(PageOutcome::InFlight);
            }
            if !thread.has_more_history {
                return Ok(PageOutcome::NoMoreHistory);
            }
            let Some(oldest) = thread.messages.oldest_confirmed() else {
                return Ok(PageOutcome::NoCursor);
            };

            let cursor = MessageCursor::before(oldest);
            thread.loading_earlier = true;
            cursor
        };

        let result = self.fetch_and_merge(conversation_id, &cursor).await;

        if let Some(thread) = self
            .ctx
            .messages()
            .write()
            .await
            .existing_thread_mut(conversation_id)
        {
            thread.loading_earlier = false;
        }

        result
    }

    async fn fetch_and_merge(
        &self,
        conversation_id: &str,
        cursor: &MessageCursor,
    ) -> Result<PageOutcome> {
        let token = self.ctx.request_token(conversation_id).await;
        let page_size = self.ctx.config().page_size;

        debug!(
            "Loading {} messages of {} before {}",
            page_size, conversation_id, cursor.before_id
        );
        let page = self
            .ctx
            .gateway()
            .fetch_messages(conversation_id, Some(cursor), page_size)
            .await?;

        if !self.ctx.is_current(&token).await {
            debug!("Discarding stale history page for {}", conversation_id);
            return Ok(PageOutcome::Stale);
        }

        if page.is_empty() {
            self.ctx
                .messages()
                .write()
                .await
                .thread_mut(conversation_id)
                .has_more_history = false;

            info!("History of {} exhausted", conversation_id);
            self.ctx.emit(SyncEvent::HistoryExhausted {
                conversation_id: conversation_id.to_string(),
            });
            return Ok(PageOutcome::Exhausted);
        }

        let mut count = 0;
        for message in page {
            let outcome = self
                .engine
                .ingest_with_origin(conversation_id, message, IngestOrigin::History)
                .await;
            if let Ok(IngestOutcome::Inserted) = outcome {
                count += 1;
            }
        }

        debug!("Merged {} older messages into {}", count, conversation_id);
        Ok(PageOutcome::Loaded { count })
    }
}
