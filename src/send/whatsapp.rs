use async_trait::async_trait;

use super::{PlatformSender, SendRequest, SentMessage};
use crate::config::WhatsAppConfig;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Connection, Platform};
use crate::utils::http::upstream_error;

/// Hands WhatsApp messages to the automation tool's webhook.
pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl PlatformSender for WhatsAppSender {
    fn platform(&self) -> Platform {
        Platform::WhatsApp
    }

    fn requires_connection(&self) -> bool {
        false
    }

    async fn send(
        &self,
        connection: Option<&Connection>,
        request: &SendRequest,
    ) -> KalmaResult<SentMessage> {
        if self.config.automation_webhook_url.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "whatsapp.automationWebhookUrl".into(),
            ));
        }
        let from = connection.map(|c| c.external_account_id.as_str());
        let mut req = self
            .client
            .post(&self.config.automation_webhook_url)
            .json(&serde_json::json!({
                "to": request.to,
                "text": request.text,
                "userId": request.user_id,
                "from": from,
            }));
        if !self.config.api_key.is_empty() {
            req = req.bearer_auth(&self.config.api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("whatsapp automation webhook unreachable: {}", e))?;
        if !response.status().is_success() {
            return Err(upstream_error("whatsapp", response).await);
        }

        // automation tools often answer with plain text like "Accepted"
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message_id = ["messageId", "message_id", "id"]
            .iter()
            .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
            .map_or_else(|| format!("wa_{}", uuid::Uuid::new_v4().simple()), str::to_string);
        Ok(SentMessage {
            message_id,
            thread_id: Some(request.to.clone()),
        })
    }
}
