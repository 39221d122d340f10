use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::Deserialize;

use super::{PlatformSender, SendRequest, SentMessage, require_connection};
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Connection, Platform};
use crate::utils::http::upstream_error;

/// Sends plain-text mail through `users.messages.send`.
pub struct GmailSender {
    api_base: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailSendResponse {
    id: String,
    thread_id: Option<String>,
}

impl GmailSender {
    pub fn new(api_base: String, client: reqwest::Client) -> Self {
        Self { api_base, client }
    }
}

fn header_value(name: &str, value: &str) -> KalmaResult<String> {
    if value.contains(['\r', '\n']) {
        return Err(KalmaError::InvalidRequest(format!(
            "{name} must not contain line breaks"
        )));
    }
    Ok(value.to_string())
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header_text(text: &str) -> String {
    if text.is_ascii() {
        text.to_string()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(text.as_bytes()))
    }
}

/// Minimal RFC 822 message with a UTF-8 plain-text body.
pub(crate) fn build_rfc822(
    from: Option<&str>,
    to: &str,
    subject: Option<&str>,
    body: &str,
) -> KalmaResult<String> {
    let mut message = String::new();
    if let Some(from) = from {
        message.push_str(&format!("From: {}\r\n", header_value("from", from)?));
    }
    message.push_str(&format!("To: {}\r\n", header_value("to", to)?));
    if let Some(subject) = subject.filter(|s| !s.is_empty()) {
        message.push_str(&format!(
            "Subject: {}\r\n",
            encode_header_text(&header_value("subject", subject)?)
        ));
    }
    message.push_str("MIME-Version: 1.0\r\n");
    message.push_str("Content-Type: text/plain; charset=\"UTF-8\"\r\n");
    message.push_str("Content-Transfer-Encoding: 8bit\r\n\r\n");
    message.push_str(body);
    Ok(message)
}

#[async_trait]
impl PlatformSender for GmailSender {
    fn platform(&self) -> Platform {
        Platform::Gmail
    }

    async fn send(
        &self,
        connection: Option<&Connection>,
        request: &SendRequest,
    ) -> KalmaResult<SentMessage> {
        let connection = require_connection(connection, Platform::Gmail)?;
        let raw = build_rfc822(
            Some(&connection.external_account_id),
            &request.to,
            request.subject.as_deref(),
            &request.text,
        )?;
        let url = format!(
            "{}/users/me/messages/send",
            self.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&connection.access_token)
            .json(&serde_json::json!({"raw": URL_SAFE_NO_PAD.encode(raw.as_bytes())}))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("gmail send request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(upstream_error("gmail", response).await);
        }
        let sent: GmailSendResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("gmail send response unreadable: {}", e))?;
        Ok(SentMessage {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }
}
