//! Push Channel Listener
//!
//! Keeps a WebSocket open to the gateway's push endpoint and feeds every
//! [`PushEvent`] into the [`SyncService`]. The connection is re-established
//! with exponential backoff whenever it drops.

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use wacrm_sync_core::{PushEvent, SyncService};

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Reconnection delay doubling up to a ceiling
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    /// Start over after a successful connection
    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// WebSocket listener for gateway push events
pub struct PushListener {
    url: String,
    token: Option<String>,
    service: SyncService,
}

impl PushListener {
    pub fn new(url: impl Into<String>, token: Option<String>, service: SyncService) -> Self {
        Self {
            url: url.into(),
            token,
            service,
        }
    }

    /// Listen until the task is cancelled
    pub async fn run(self) {
        let mut backoff = Backoff::default();

        loop {
            match self.connect().await {
                Ok(stream) => {
                    info!("Push channel connected to {}", self.url);
                    backoff.reset();
                    let forwarded = self.consume(stream).await;
                    warn!("Push channel closed after {} events", forwarded);
                }
                Err(e) => warn!("Push channel connection failed: {:#}", e),
            }

            let delay = backoff.next_delay();
            debug!("Reconnecting push channel in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(
        &self,
    ) -> Result<impl Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .with_context(|| format!("Invalid push URL {}", self.url))?;

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("API token is not a valid header value")?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .context("WebSocket handshake failed")?;
        Ok(stream)
    }

    /// Forward frames until the stream ends; returns the number of events delivered
    async fn consume<S>(&self, mut stream: S) -> usize
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>> + Unpin,
    {
        let mut forwarded = 0;

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    if let Some(event) = parse_frame(text.as_str()) {
                        self.service.handle_push(event).await;
                        forwarded += 1;
                    }
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!("Push channel close frame: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Push channel read error: {}", e);
                    break;
                }
            }
        }

        forwarded
    }
}

/// Decode one text frame, skipping anything that is not a push event
fn parse_frame(text: &str) -> Option<PushEvent> {
    match serde_json::from_str::<PushEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed push frame: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use wacrm_sync_core::{
        Conversation, Gateway, Message, MessageCursor, SendRequest, SendResponse, StatusResponse,
        SyncConfig,
    };

    /// Gateway that pairs immediately and has no data
    #[derive(Debug)]
    struct PairedGateway;

    #[async_trait]
    impl Gateway for PairedGateway {
        async fn status(&self) -> wacrm_sync_core::Result<StatusResponse> {
            Ok(StatusResponse::connected("+15550100"))
        }

        async fn start_session(&self) -> wacrm_sync_core::Result<StatusResponse> {
            Ok(StatusResponse::connected("+15550100"))
        }

        async fn refresh_qr(&self) -> wacrm_sync_core::Result<StatusResponse> {
            Ok(StatusResponse::connected("+15550100"))
        }

        async fn stop_session(&self, _force: bool) -> wacrm_sync_core::Result<()> {
            Ok(())
        }

        async fn list_conversations(&self) -> wacrm_sync_core::Result<Vec<Conversation>> {
            Ok(Vec::new())
        }

        async fn fetch_messages(
            &self,
            _conversation_id: &str,
            _before: Option<&MessageCursor>,
            _limit: usize,
        ) -> wacrm_sync_core::Result<Vec<Message>> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            _request: SendRequest,
        ) -> wacrm_sync_core::Result<SendResponse> {
            Ok(SendResponse::default())
        }
    }

    fn frame(event: &PushEvent) -> std::result::Result<WsMessage, WsError> {
        Ok(WsMessage::text(serde_json::to_string(event).unwrap()))
    }

    #[test]
    fn test_backoff_doubles_and_resets() {
        let mut backoff = Backoff::default();
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_frame_rejects_garbage() {
        assert!(parse_frame("not json").is_none());
        assert!(parse_frame(r#"{"kind":"typing","conversationId":"c1"}"#).is_none());
        assert!(parse_frame(
            r#"{"kind":"conversation-update","conversationId":"c1","patch":{"pinned":true}}"#
        )
        .is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_skips_malformed_frames() {
        let service = SyncService::new(Arc::new(PairedGateway), SyncConfig::default(), "test");
        service.session().start().await.unwrap();
        let listener = PushListener::new("ws://localhost/push", None, service.clone());

        let first = PushEvent::Message {
            conversation_id: "c1".to_string(),
            message: Message::inbound("m1", "c1", "hello", 1_000),
        };
        let second = PushEvent::Message {
            conversation_id: "c1".to_string(),
            message: Message::inbound("m2", "c1", "again", 2_000),
        };
        let frames = futures::stream::iter(vec![
            frame(&first),
            Ok(WsMessage::text("{broken".to_string())),
            Ok(WsMessage::Ping(Default::default())),
            frame(&second),
            Ok(WsMessage::Close(None)),
            frame(&first),
        ]);

        assert_eq!(listener.consume(frames).await, 2);
        assert_eq!(service.messages("c1").await.len(), 2);
        assert_eq!(service.conversations().await[0].unread_count, 2);
    }
}
