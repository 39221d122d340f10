use async_trait::async_trait;
use serde::Deserialize;

use super::{PlatformSender, SendRequest, SentMessage, require_connection};
use crate::config::InstagramConfig;
use crate::errors::KalmaResult;
use crate::models::{Connection, Platform};
use crate::utils::http::upstream_error;

/// Replies to Instagram conversations through the Graph API send endpoint.
pub struct InstagramSender {
    messages_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphSendResponse {
    recipient_id: Option<String>,
    message_id: String,
}

impl InstagramSender {
    pub fn new(config: &InstagramConfig, client: reqwest::Client) -> Self {
        Self {
            messages_url: format!(
                "{}/{}/me/messages",
                config.graph_base.trim_end_matches('/'),
                config.api_version
            ),
            client,
        }
    }
}

#[async_trait]
impl PlatformSender for InstagramSender {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn send(
        &self,
        connection: Option<&Connection>,
        request: &SendRequest,
    ) -> KalmaResult<SentMessage> {
        let connection = require_connection(connection, Platform::Instagram)?;
        let response = self
            .client
            .post(&self.messages_url)
            .bearer_auth(&connection.access_token)
            .json(&serde_json::json!({
                "recipient": {"id": request.to},
                "message": {"text": request.text},
            }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("instagram send request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(upstream_error("instagram", response).await);
        }
        let sent: GraphSendResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("instagram send response unreadable: {}", e))?;
        Ok(SentMessage {
            message_id: sent.message_id,
            thread_id: sent.recipient_id.or_else(|| Some(request.to.clone())),
        })
    }
}
