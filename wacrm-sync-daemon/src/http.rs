//! HTTP Gateway
//!
//! [`Gateway`] implementation over the gateway's REST API.
//!
//! ## Failure Classification
//!
//! | Failure | Error |
//! |---------|-------|
//! | timeout, connection refused, 5xx, 408, 429 | `TransientNetwork` |
//! | 401, 403 | `AuthExpired` |
//! | other 4xx | `Gateway` (`SendFailed` on the send endpoint) |
//! | undecodable body | `Gateway` |

use crate::config::GatewayConfig;
use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use tracing::debug;
use wacrm_sync_core::{
    Conversation, Gateway, Message, MessageCursor, Result, SendRequest, SendResponse,
    StatusResponse, SyncError,
};

/// Longest response body quoted in an error
const MAX_ERROR_BODY: usize = 200;

#[derive(Serialize)]
struct StopRequest {
    force: bool,
}

/// REST client for the messaging gateway
#[derive(Clone)]
pub struct HttpGateway {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url.as_str())
            .field("token", &self.token.as_ref().map(|_| "****"))
            .finish()
    }
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("Invalid gateway URL {}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Gateway URL {} cannot carry a path", config.base_url);
        }

        Ok(Self {
            http,
            base_url,
            token: config.api_token.clone(),
        })
    }

    /// Endpoint URL; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.url(segments);
        debug!("GET {}", url.path());
        let response = self.execute(self.http.get(url)).await?;
        response.json::<T>().await.map_err(transport_error)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let url = self.url(segments);
        debug!("POST {}", url.path());
        let response = self.execute(self.http.post(url).json(body)).await?;
        response.json::<T>().await.map_err(transport_error)
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn status(&self) -> Result<StatusResponse> {
        self.get(&["session", "status"]).await
    }

    async fn start_session(&self) -> Result<StatusResponse> {
        self.post(&["session", "start"], &serde_json::json!({}))
            .await
    }

    async fn refresh_qr(&self) -> Result<StatusResponse> {
        self.post(&["session", "refresh-qr"], &serde_json::json!({}))
            .await
    }

    async fn stop_session(&self, force: bool) -> Result<()> {
        debug!("POST session/stop (force={})", force);
        self.execute(
            self.http
                .post(self.url(&["session", "stop"]))
                .json(&StopRequest { force }),
        )
        .await?;
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.get(&["conversations"]).await
    }

    async fn fetch_messages(
        &self,
        conversation_id: &str,
        before: Option<&MessageCursor>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let url = self.url(&["conversations", conversation_id, "messages"]);
        debug!("GET {} (before={:?}, limit={})", url.path(), before, limit);

        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = before {
            query.push(("before", cursor.before_timestamp_ms.to_string()));
            query.push(("beforeId", cursor.before_id.clone()));
        }

        let response = self
            .execute(self.http.get(url).query(&query))
            .await?;
        response.json().await.map_err(transport_error)
    }

    async fn send_message(&self, request: SendRequest) -> Result<SendResponse> {
        self.post(&["messages", "send"], &request)
            .await
            .map_err(|e| match e {
                SyncError::Gateway(reason) => SyncError::SendFailed(reason),
                other => other,
            })
    }
}

/// Classify a failure that produced no usable response
fn transport_error(error: reqwest::Error) -> SyncError {
    if error.is_decode() {
        return SyncError::Gateway(format!("invalid response: {}", error));
    }
    match error.status() {
        Some(status) => status_error(status, ""),
        None => SyncError::TransientNetwork(error.to_string()),
    }
}

/// Classify a non-success HTTP status
fn status_error(status: StatusCode, body: &str) -> SyncError {
    let body = body.trim();
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        let quoted: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}: {}", status, quoted)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthExpired(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SyncError::TransientNetwork(detail)
        }
        s if s.is_server_error() => SyncError::TransientNetwork(detail),
        _ => SyncError::Gateway(detail),
    }
}
