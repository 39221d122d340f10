//! Outbound send dispatcher.
//!
//! Routes a send request to the sender for its platform, using the user's
//! stored connection (refreshed when expired), and records the sent message
//! in the user's inbox.

mod gmail;
mod instagram;
mod whatsapp;

pub use gmail::GmailSender;
pub use instagram::InstagramSender;
pub use whatsapp::WhatsAppSender;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{
    Connection, MessageStatus, NormalizedMessage, Platform, paths, sanitize_segment,
    validate_user_id,
};
use crate::oauth::{self, ProviderRegistry};
use crate::store::DocumentStore;

/// Body of `POST /api/messages/send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Platform name as sent by the client (`gmail`, `email`, `instagram`, `whatsapp`).
    pub platform: String,
    pub to: String,
    pub text: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResponse {
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            error: None,
        }
    }

    pub fn failed(err: &KalmaError) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(err.public_message()),
        }
    }
}

/// What a platform reported back for an accepted message.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[async_trait]
pub trait PlatformSender: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether sending needs the user's stored connection.
    fn requires_connection(&self) -> bool {
        true
    }

    async fn send(
        &self,
        connection: Option<&Connection>,
        request: &SendRequest,
    ) -> KalmaResult<SentMessage>;
}

/// Fetch the connection a sender must have, as an error when absent.
pub(crate) fn require_connection(
    connection: Option<&Connection>,
    platform: Platform,
) -> KalmaResult<&Connection> {
    connection.ok_or_else(|| KalmaError::InvalidRequest(format!("{platform} is not connected")))
}

pub struct Dispatcher {
    store: Arc<dyn DocumentStore>,
    providers: ProviderRegistry,
    senders: HashMap<Platform, Arc<dyn PlatformSender>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, providers: ProviderRegistry) -> Self {
        Self {
            store,
            providers,
            senders: HashMap::new(),
        }
    }

    /// Dispatcher with a sender for every supported platform.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn DocumentStore>,
        providers: ProviderRegistry,
        client: &reqwest::Client,
    ) -> Self {
        let mut dispatcher = Self::new(store, providers);
        dispatcher.register(Arc::new(WhatsAppSender::new(
            config.whatsapp.clone(),
            client.clone(),
        )));
        dispatcher.register(Arc::new(GmailSender::new(
            config.providers.gmail.api_base.clone(),
            client.clone(),
        )));
        dispatcher.register(Arc::new(InstagramSender::new(
            &config.providers.instagram,
            client.clone(),
        )));
        dispatcher
    }

    pub fn register(&mut self, sender: Arc<dyn PlatformSender>) {
        self.senders.insert(sender.platform(), sender);
    }

    async fn connection_for(
        &self,
        platform: Platform,
        user_id: &str,
    ) -> KalmaResult<Connection> {
        let connection = oauth::load_connection(self.store.as_ref(), user_id, platform)
            .await?
            .ok_or_else(|| KalmaError::InvalidRequest(format!("{platform} is not connected")))?;
        match self.providers.get(platform) {
            Ok(provider) => {
                oauth::ensure_fresh(provider.as_ref(), self.store.as_ref(), connection).await
            }
            Err(_) => Ok(connection),
        }
    }

    /// Send one message and record it in the sender's inbox.
    ///
    /// Failing to record an accepted message is logged, not returned: the
    /// message already left and a retry would send it twice.
    pub async fn send_message(&self, request: &SendRequest) -> KalmaResult<SentMessage> {
        let platform: Platform = request.platform.parse()?;
        for (name, value) in [
            ("to", &request.to),
            ("text", &request.text),
            ("userId", &request.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(KalmaError::InvalidRequest(format!("{name} is required")));
            }
        }
        validate_user_id(&request.user_id)?;
        let sender = self
            .senders
            .get(&platform)
            .ok_or_else(|| KalmaError::UnsupportedPlatform(request.platform.clone()))?;

        let connection = if sender.requires_connection() {
            Some(self.connection_for(platform, &request.user_id).await?)
        } else {
            oauth::load_connection(self.store.as_ref(), &request.user_id, platform).await?
        };

        debug!(
            "sending {} message for user {} ({} chars)",
            platform,
            request.user_id,
            request.text.len()
        );
        let sent = match sender.send(connection.as_ref(), request).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("{} send for user {} failed: {}", platform, request.user_id, e);
                return Err(e);
            }
        };
        info!(
            "{} message {} sent for user {}",
            platform, sent.message_id, request.user_id
        );

        let message = NormalizedMessage {
            id: sanitize_segment(&sent.message_id),
            platform,
            user_id: request.user_id.clone(),
            sender: connection
                .as_ref()
                .map_or_else(|| request.user_id.clone(), |c| c.external_account_id.clone()),
            recipient: request.to.clone(),
            content: request.text.clone(),
            timestamp: Utc::now(),
            thread_id: sent.thread_id.clone(),
            is_read: true,
            is_from_me: true,
            status: MessageStatus::Sent,
        };
        if let Err(e) = self.record(&message).await {
            error!(
                "{} message {} sent but not recorded: {}",
                platform, sent.message_id, e
            );
        }
        Ok(sent)
    }

    async fn record(&self, message: &NormalizedMessage) -> KalmaResult<()> {
        let value = serde_json::to_value(message).map_err(KalmaError::persistence)?;
        self.store
            .set(&paths::message(&message.user_id, &message.id), value)
            .await
    }

    async fn patch_message(
        &self,
        user_id: &str,
        message_id: &str,
        patch: serde_json::Value,
    ) -> KalmaResult<()> {
        validate_user_id(user_id)?;
        let path = paths::message(user_id, &sanitize_segment(message_id));
        if self.store.get(&path).await?.is_none() {
            return Err(KalmaError::NotFound(format!(
                "message {message_id} for user {user_id}"
            )));
        }
        self.store.update(&path, patch).await
    }

    pub async fn mark_read(&self, user_id: &str, message_id: &str) -> KalmaResult<()> {
        self.patch_message(user_id, message_id, serde_json::json!({"isRead": true}))
            .await
    }

    pub async fn update_status(
        &self,
        user_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> KalmaResult<()> {
        self.patch_message(user_id, message_id, serde_json::json!({"status": status}))
            .await
    }
}
