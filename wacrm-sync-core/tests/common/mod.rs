//! Scripted gateway shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use wacrm_sync_core::{
    current_timestamp, Conversation, Gateway, Message, MessageCursor, Result, SendRequest,
    SendResponse, SessionState, StatusResponse, SyncConfig, SyncError, SyncService,
};

/// Gateway whose answers are scripted by the test
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    pub status: Mutex<Option<StatusResponse>>,
    pub start_response: Mutex<Option<StatusResponse>>,
    pub qr_queue: Mutex<VecDeque<String>>,
    pub conversations: Mutex<Vec<Conversation>>,
    pub history: Mutex<HashMap<String, Vec<Message>>>,
    pub send_ids: Mutex<VecDeque<String>>,
    pub list_failures: Mutex<VecDeque<SyncError>>,
    pub fetch_failures: Mutex<VecDeque<SyncError>>,
    pub send_failures: Mutex<VecDeque<SyncError>>,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub send_delay: Mutex<Option<Duration>>,
    pub refresh_calls: Mutex<usize>,
    pub status_calls: Mutex<usize>,
    pub list_calls: Mutex<usize>,
    pub fetch_calls: Mutex<usize>,
    pub stop_calls: Mutex<usize>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_status(&self, status: StatusResponse) {
        *self.status.lock().await = Some(status);
    }

    pub async fn count(counter: &Mutex<usize>) -> usize {
        *counter.lock().await
    }

    /// `count` inbound messages one second apart, ids `<conversation>-<n>`
    pub async fn seed(&self, conversation_id: &str, count: usize) {
        let mut history = self.history.lock().await;
        let messages = history.entry(conversation_id.to_string()).or_default();
        for n in 0..count {
            messages.push(Message::inbound(
                format!("{}-{}", conversation_id, n),
                conversation_id,
                format!("text {}", n),
                (n as i64 + 1) * 1_000,
            ));
        }
    }
}

#[async_trait::async_trait]
impl Gateway for ScriptedGateway {
    async fn status(&self) -> Result<StatusResponse> {
        *self.status_calls.lock().await += 1;
        Ok(self
            .status
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| StatusResponse::bare(SessionState::Disconnected)))
    }

    async fn start_session(&self) -> Result<StatusResponse> {
        let response = self
            .start_response
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| StatusResponse::bare(SessionState::Connecting));
        self.set_status(response.clone()).await;
        Ok(response)
    }

    async fn refresh_qr(&self) -> Result<StatusResponse> {
        *self.refresh_calls.lock().await += 1;
        let payload = self
            .qr_queue
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| SyncError::Gateway("no QR payload scripted".to_string()))?;

        let status = StatusResponse::qr(payload);
        self.set_status(status.clone()).await;
        Ok(status)
    }

    async fn stop_session(&self, _force: bool) -> Result<()> {
        *self.stop_calls.lock().await += 1;
        self.set_status(StatusResponse::bare(SessionState::Disconnected))
            .await;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        *self.list_calls.lock().await += 1;
        if let Some(error) = self.list_failures.lock().await.pop_front() {
            return Err(error);
        }
        Ok(self.conversations.lock().await.clone())
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        *self.fetch_calls.lock().await += 1;
        if let Some(error) = self.fetch_failures.lock().await.pop_front() {
            return Err(error);
        }
        let delay = *self.fetch_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let history = self.history.lock().await;
        let messages = history.get(conversation_id).cloned().unwrap_or_default();
        let end = before
            .and_then(|cursor| messages.iter().position(|m| m.id == cursor.before_id))
            .unwrap_or(messages.len());
        Ok(messages[end.saturating_sub(limit)..end].to_vec())
    }

    async fn send_message(&self, request: SendRequest) -> Result<SendResponse> {
        if let Some(error) = self.send_failures.lock().await.pop_front() {
            return Err(error);
        }
        let delay = *self.send_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let id = self
            .send_ids
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| SyncError::SendFailed("503 gateway overloaded".to_string()))?;

        Ok(SendResponse {
            id: Some(id),
            timestamp_ms: Some(current_timestamp()),
            client_message_id: Some(request.client_message_id),
        })
    }
}

/// Service over `gateway`
pub fn service(gateway: &Arc<ScriptedGateway>) -> SyncService {
    SyncService::new(gateway.clone(), SyncConfig::default(), "crm-instance")
}

/// Service whose session is already paired
pub async fn connected_service(gateway: &Arc<ScriptedGateway>) -> SyncService {
    *gateway.start_response.lock().await = Some(StatusResponse::connected("+15550100"));
    let service = service(gateway);
    service
        .session()
        .start()
        .await
        .expect("session starts");
    service
}
