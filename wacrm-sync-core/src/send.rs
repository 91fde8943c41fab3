//! Optimistic Send Reconciler
//!
//! A send shows up immediately: the message is inserted as `pending` under a
//! client temp id before the gateway is contacted, and the temp id travels
//! with the request as `clientMessageId`. When the gateway answers, the
//! provisional entry is replaced in place by the confirmed record.
//!
//! ## Reconciliation paths
//!
//! 1. The response carries the new message id: the provisional entry is
//!    replaced directly.
//! 2. The push channel delivered the confirmed record first (carrying the
//!    temp id): the sync engine already reconciled it; nothing left to do.
//! 3. The response carries no id: the conversation tail is re-fetched and the
//!    oldest unclaimed outbound record with the same body, issued within the
//!    match tolerance, is taken as the confirmation. A record is claimed as
//!    soon as a send picks it, so concurrent identical sends never share one.
//!    This is best effort. Two identical bodies sent within the tolerance may
//!    be paired crosswise; if nothing matches, the provisional entry is kept
//!    and marked `sent`.
//!
//! A failed send leaves the entry in the list as `failed`, body intact, so it
//! can be retried. An expired session is the exception: the entry is marked
//! failed and the `AuthExpired` error is returned so the caller can end the
//! session.

use crate::context::SyncContext;
use crate::events::SyncEvent;
use crate::gateway::{SendRequest, SendResponse};
use crate::messages::ReconcileOutcome;
use crate::model::{current_timestamp, DeliveryState, Direction, Message};
use crate::{Result, SyncError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Send issued but not yet answered by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub client_temp_id: String,
    pub conversation_id: String,
    pub body: String,
    /// Local issue time (ms since epoch)
    pub issued_at: i64,
}

/// How a send ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Provisional entry replaced by the server record
    Confirmed { message_id: String },
    /// Gateway accepted the send but no server record could be matched
    Unmatched,
    /// Gateway rejected the send; the entry is marked failed
    Failed { reason: String },
}

/// Result of [`OptimisticSendReconciler::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub client_temp_id: String,
    pub outcome: SendOutcome,
}

impl SendReceipt {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, SendOutcome::Confirmed { .. })
    }
}

/// Optimistic send with reconciliation
#[derive(Debug, Clone)]
pub struct OptimisticSendReconciler {
    ctx: SyncContext,
    pending: Arc<RwLock<HashMap<String, PendingSend>>>,
    /// Tail records picked by sends that have not reconciled yet
    claims: Arc<Mutex<HashSet<String>>>,
}

impl OptimisticSendReconciler {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            pending: Arc::new(RwLock::new(HashMap::new())),
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Send a text message
    pub async fn send(&self, conversation_id: &str, body: &str) -> Result<SendReceipt> {
        self.ctx.ensure_authenticated()?;

        if body.trim().is_empty() {
            return Err(SyncError::InvalidInput("message body is empty".to_string()));
        }

        let pending = PendingSend {
            client_temp_id: format!("tmp-{}", Uuid::new_v4()),
            conversation_id: conversation_id.to_string(),
            body: body.to_string(),
            issued_at: current_timestamp(),
        };

        self.insert_provisional(&pending).await;
        self.pending
            .write()
            .await
            .insert(pending.client_temp_id.clone(), pending.clone());

        let request = SendRequest {
            conversation_id: pending.conversation_id.clone(),
            body: pending.body.clone(),
            client_message_id: pending.client_temp_id.clone(),
        };

        debug!(
            "Sending {} to {}",
            pending.client_temp_id, pending.conversation_id
        );
        let result = self.ctx.gateway().send_message(request).await;

        let outcome = match result {
            Ok(response) => self.on_accepted(&pending, response).await,
            Err(e) => self.on_failed(&pending, e).await,
        };

        self.pending.write().await.remove(&pending.client_temp_id);

        Ok(SendReceipt {
            client_temp_id: pending.client_temp_id,
            outcome: outcome?,
        })
    }

    /// Resend a failed message under a new temp id
    pub async fn retry(&self, conversation_id: &str, client_temp_id: &str) -> Result<SendReceipt> {
        self.ctx.ensure_authenticated()?;

        let body = {
            let mut store = self.ctx.messages().write().await;
            let list = &mut store.thread_mut(conversation_id).messages;

            let failed = list
                .provisional(client_temp_id)
                .ok_or_else(|| SyncError::MessageNotFound(client_temp_id.to_string()))?;
            if failed.delivery_state != DeliveryState::Failed {
                return Err(SyncError::invalid_state(format!(
                    "message {} has not failed",
                    client_temp_id
                )));
            }

            let body = failed.body.clone();
            list.remove(client_temp_id);
            body
        };

        info!("Retrying send {} in {}", client_temp_id, conversation_id);
        self.ctx.emit(SyncEvent::MessagesChanged {
            conversation_id: conversation_id.to_string(),
        });
        self.send(conversation_id, &body).await
    }

    /// Sends still waiting for a gateway answer
    pub async fn pending_sends(&self) -> Vec<PendingSend> {
        let mut sends: Vec<PendingSend> = self.pending.read().await.values().cloned().collect();
        sends.sort_by_key(|s| s.issued_at);
        sends
    }

    async fn insert_provisional(&self, pending: &PendingSend) {
        let provisional = Message::provisional(
            pending.client_temp_id.clone(),
            pending.conversation_id.clone(),
            pending.body.clone(),
            pending.issued_at,
        );

        self.ctx
            .messages()
            .write()
            .await
            .thread_mut(&pending.conversation_id)
            .messages
            .insert(provisional.clone());
        self.ctx
            .conversations()
            .write()
            .await
            .record_activity(&provisional);

        if self.ctx.is_active(&pending.conversation_id).await {
            self.ctx.emit(SyncEvent::AutoScrollRequested {
                conversation_id: pending.conversation_id.clone(),
                outgoing: true,
            });
        }
        self.ctx.emit(SyncEvent::ConversationsChanged);
        self.ctx.emit(SyncEvent::MessagesChanged {
            conversation_id: pending.conversation_id.clone(),
        });
    }

    async fn on_accepted(
        &self,
        pending: &PendingSend,
        response: SendResponse,
    ) -> Result<SendOutcome> {
        let confirmed = match response.id {
            Some(id) if !id.is_empty() => Some(Message::outbound(
                id,
                pending.conversation_id.clone(),
                pending.body.clone(),
                response.timestamp_ms.unwrap_or(pending.issued_at),
            )),
            _ => match self.match_from_tail(pending).await {
                Ok(found) => found,
                Err(e) if e.is_auth_expired() => return Err(e),
                Err(e) => {
                    warn!("Tail fetch for send {} failed: {}", pending.client_temp_id, e);
                    None
                }
            },
        };

        let Some(confirmed) = confirmed else {
            warn!(
                "No server record matched send {}, keeping it as sent",
                pending.client_temp_id
            );
            self.ctx
                .messages()
                .write()
                .await
                .thread_mut(&pending.conversation_id)
                .messages
                .set_delivery_state(&pending.client_temp_id, DeliveryState::Sent);
            self.ctx.emit(SyncEvent::MessagesChanged {
                conversation_id: pending.conversation_id.clone(),
            });
            return Ok(SendOutcome::Unmatched);
        };

        let message_id = confirmed.id.clone();
        let reconciled = self
            .ctx
            .messages()
            .write()
            .await
            .thread_mut(&pending.conversation_id)
            .messages
            .reconcile(&pending.client_temp_id, confirmed);
        self.claims.lock().await.remove(&message_id);

        match reconciled {
            ReconcileOutcome::Replaced | ReconcileOutcome::Merged => {
                info!("Send {} confirmed as {}", pending.client_temp_id, message_id);
                self.ctx.emit(SyncEvent::SendConfirmed {
                    conversation_id: pending.conversation_id.clone(),
                    client_temp_id: pending.client_temp_id.clone(),
                    message_id: message_id.clone(),
                });
                self.ctx.emit(SyncEvent::MessagesChanged {
                    conversation_id: pending.conversation_id.clone(),
                });
            }
            ReconcileOutcome::AlreadyReconciled => {
                debug!(
                    "Send {} was already reconciled by the push channel",
                    pending.client_temp_id
                );
            }
            ReconcileOutcome::Missing => {
                // Conversation was reset (session stopped) while sending
                debug!(
                    "Provisional entry for {} is gone, nothing to reconcile",
                    pending.client_temp_id
                );
            }
        }

        Ok(SendOutcome::Confirmed { message_id })
    }

    /// Find the server record of an id-less confirmation in the conversation tail
    async fn match_from_tail(&self, pending: &PendingSend) -> Result<Option<Message>> {
        let config = self.ctx.config();
        let tail = self
            .ctx
            .gateway()
            .fetch_messages(&pending.conversation_id, None, config.tail_fetch_limit)
            .await?;

        let store = self.ctx.messages().read().await;
        let list = store
            .thread(&pending.conversation_id)
            .map(|thread| &thread.messages);
        let mut claims = self.claims.lock().await;

        let candidate = tail.into_iter().find(|m| {
            m.direction == Direction::Out
                && m.body == pending.body
                && (m.timestamp_ms - pending.issued_at).abs() <= config.send_match_tolerance_ms
                && !claims.contains(&m.id)
                && !list.map(|l| l.is_claimed(&m.id)).unwrap_or(false)
        });
        if let Some(found) = &candidate {
            claims.insert(found.id.clone());
        }

        Ok(candidate.map(|mut m| {
            m.conversation_id = pending.conversation_id.clone();
            m.delivery_state = m.delivery_state.advance(DeliveryState::Sent);
            m
        }))
    }

    async fn on_failed(&self, pending: &PendingSend, error: SyncError) -> Result<SendOutcome> {
        let reason = error.to_string();
        warn!("Send {} failed: {}", pending.client_temp_id, reason);

        self.ctx
            .messages()
            .write()
            .await
            .thread_mut(&pending.conversation_id)
            .messages
            .set_delivery_state(&pending.client_temp_id, DeliveryState::Failed);

        self.ctx.emit(SyncEvent::SendFailed {
            conversation_id: pending.conversation_id.clone(),
            client_temp_id: pending.client_temp_id.clone(),
            reason: reason.clone(),
        });
        self.ctx.emit(SyncEvent::MessagesChanged {
            conversation_id: pending.conversation_id.clone(),
        });

        if error.is_auth_expired() {
            return Err(error);
        }
        Ok(SendOutcome::Failed { reason })
    }
}
