//! In-memory gateway for unit tests

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::gateway::{Gateway, SendRequest, SendResponse, StatusResponse};
use crate::model::{current_timestamp, Conversation, Message, MessageCursor, SessionState};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Call counters
#[derive(Debug, Default, Clone, Copy)]
pub struct Calls {
    pub status: usize,
    pub start: usize,
    pub refresh_qr: usize,
    pub stop: usize,
    pub list: usize,
    pub fetch: usize,
    pub send: usize,
}

#[derive(Debug)]
pub struct MockState {
    pub status: StatusResponse,
    pub start_response: StatusResponse,
    pub qr_payloads: VecDeque<String>,
    pub conversations: Vec<Conversation>,
    /// Server-side history per conversation, oldest first
    pub history: HashMap<String, Vec<Message>>,
    /// Whether send responses carry the new message id
    pub echo_send_ids: bool,
    /// Whether sends are appended to the server-side history
    pub persist_sends: bool,
    pub fetch_delay: Option<Duration>,
    pub send_delay: Option<Duration>,
    pub status_failures: VecDeque<SyncError>,
    pub start_failures: VecDeque<SyncError>,
    pub stop_failures: VecDeque<SyncError>,
    pub fetch_failures: VecDeque<SyncError>,
    pub send_failures: VecDeque<SyncError>,
    pub sent: Vec<SendRequest>,
    pub calls: Calls,
    next_id: u64,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            status: StatusResponse::bare(SessionState::Disconnected),
            start_response: StatusResponse::bare(SessionState::Connecting),
            qr_payloads: VecDeque::new(),
            conversations: Vec::new(),
            history: HashMap::new(),
            echo_send_ids: true,
            persist_sends: true,
            fetch_delay: None,
            send_delay: None,
            status_failures: VecDeque::new(),
            start_failures: VecDeque::new(),
            stop_failures: VecDeque::new(),
            fetch_failures: VecDeque::new(),
            send_failures: VecDeque::new(),
            sent: Vec::new(),
            calls: Calls::default(),
            next_id: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Calls {
        self.state().calls
    }

    /// Seed `count` inbound messages, one second apart, ids `<prefix>-<n>`
    pub fn seed_history(&self, conversation_id: &str, prefix: &str, count: usize) {
        let mut state = self.state();
        let history = state.history.entry(conversation_id.to_string()).or_default();
        for n in 0..count {
            history.push(Message::inbound(
                format!("{}-{}", prefix, n),
                conversation_id,
                format!("message {}", n),
                1_000 * (n as i64 + 1),
            ));
        }
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn status(&self) -> Result<StatusResponse> {
        let mut state = self.state();
        state.calls.status += 1;
        if let Some(error) = state.status_failures.pop_front() {
            return Err(error);
        }
        Ok(state.status.clone())
    }

    async fn start_session(&self) -> Result<StatusResponse> {
        let mut state = self.state();
        state.calls.start += 1;
        if let Some(error) = state.start_failures.pop_front() {
            return Err(error);
        }
        state.status = state.start_response.clone();
        Ok(state.start_response.clone())
    }

    async fn refresh_qr(&self) -> Result<StatusResponse> {
        let mut state = self.state();
        state.calls.refresh_qr += 1;
        let payload = state
            .qr_payloads
            .pop_front()
            .unwrap_or_else(|| format!("QR-{}", state.calls.refresh_qr));
        state.status = StatusResponse::qr(payload.clone());
        Ok(StatusResponse::qr(payload))
    }

    async fn stop_session(&self, _force: bool) -> Result<()> {
        let mut state = self.state();
        state.calls.stop += 1;
        if let Some(error) = state.stop_failures.pop_front() {
            return Err(error);
        }
        state.status = StatusResponse::bare(SessionState::Disconnected);
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut state = self.state();
        state.calls.list += 1;
        Ok(state.conversations.clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let delay = {
            let mut state = self.state();
            state.calls.fetch += 1;
            if let Some(error) = state.fetch_failures.pop_front() {
                return Err(error);
            }
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state();
        let history = state
            .history
            .get(conversation_id)
            .cloned()
            .unwrap_or_default();

        let end = match before {
            Some(cursor) => history
                .iter()
                .position(|m| m.id == cursor.before_id)
                .unwrap_or_else(|| {
                    history
                        .iter()
                        .take_while(|m| m.timestamp_ms < cursor.before_timestamp_ms)
                        .count()
                }),
            None => history.len(),
        };
        let start = end.saturating_sub(limit);
        Ok(history[start..end].to_vec())
    }

    async fn send_message(&self, request: SendRequest) -> Result<SendResponse> {
        let delay = {
            let mut state = self.state();
            state.calls.send += 1;
            state.sent.push(request.clone());
            if let Some(error) = state.send_failures.pop_front() {
                return Err(error);
            }
            state.send_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        let id = format!("m{}", state.next_id);
        state.next_id += 1;
        let timestamp_ms = current_timestamp();

        if state.persist_sends {
            state
                .history
                .entry(request.conversation_id.clone())
                .or_default()
                .push(Message::outbound(
                    id.clone(),
                    request.conversation_id.clone(),
                    request.body.clone(),
                    timestamp_ms,
                ));
        }

        if state.echo_send_ids {
            Ok(SendResponse {
                id: Some(id),
                timestamp_ms: Some(timestamp_ms),
                client_message_id: Some(request.client_message_id),
            })
        } else {
            Ok(SendResponse::default())
        }
    }
}

/// Context over `gateway` with the session already authenticated
pub fn connected_context(gateway: Arc<MockGateway>) -> SyncContext {
    let ctx = SyncContext::new(gateway, SyncConfig::default());
    ctx.publish_session_state(SessionState::Connected);
    ctx
}
