// Graph API messaging dispatcher.
//
// POST {graph_api_url}/{business_id}/messages
//   Authorization: Bearer <access token>
//   { "recipient": { "id": ... }, "message": { "text": ... } }
//
// One call per `send`, bounded by the configured timeout. The response is
// classified into the DispatchError kinds; the body of a failed call is
// inspected for the messaging-window error code/subcode pair.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{DispatchError, WINDOW_EXPIRED_CODE, WINDOW_EXPIRED_SUBCODE};
use super::traits::Dispatcher;
use crate::config::PipelineConfig;

pub struct GraphDispatcher {
    client: Client,
    messages_url: String,
    access_token: String,
}

impl GraphDispatcher {
    /// Build a dispatcher from the pipeline configuration.
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.dispatch_timeout)
            .user_agent(concat!("autodm/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/{}/messages",
                config.graph_api_url.trim_end_matches('/'),
                config.business_id
            ),
            access_token: config.access_token.clone(),
        })
    }
}

#[async_trait]
impl Dispatcher for GraphDispatcher {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<(), DispatchError> {
        let request = SendMessageRequest {
            recipient: Recipient { id: recipient_id },
            message: MessageBody { text },
        };

        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(describe_transport_error(&e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(recipient_id, status = status.as_u16(), "Message accepted");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), body))
    }
}

/// Turn a non-2xx response into an error kind.
pub fn classify_failure(status: u16, body: String) -> DispatchError {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let error = parsed.error;
        if error.code == Some(WINDOW_EXPIRED_CODE)
            && error.error_subcode == Some(WINDOW_EXPIRED_SUBCODE)
        {
            return DispatchError::WindowExpired {
                status,
                message: error.message.unwrap_or_default(),
            };
        }
    }
    DispatchError::Api { status, body }
}

fn describe_transport_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

// --- Graph API request/response types ---

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    recipient: Recipient<'a>,
    message: MessageBody<'a>,
}

#[derive(Serialize)]
struct Recipient<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    message: Option<String>,
    code: Option<i64>,
    error_subcode: Option<i64>,
}
