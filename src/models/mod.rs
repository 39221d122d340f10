//! Documents the bridge reads and writes in the store.
//!
//! Every document type serializes with camelCase keys so the records stay
//! readable by the web app that shares the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::KalmaError;

/// Seconds before `expiry` at which a token is already treated as expired.
pub const TOKEN_EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gmail,
    Instagram,
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Gmail, Platform::Instagram, Platform::WhatsApp];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Instagram => "instagram",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = KalmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "email" => Ok(Self::Gmail),
            "instagram" => Ok(Self::Instagram),
            "whatsapp" => Ok(Self::WhatsApp),
            _ => Err(KalmaError::UnsupportedPlatform(s.to_string())),
        }
    }
}

/// Stored OAuth credential set linking a user to one external account.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub user_id: String,
    pub platform: Platform,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    pub external_account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub profile: serde_json::Value,
    pub connected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.user_id)
            .field("platform", &self.platform)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expiry", &self.expiry)
            .field("external_account_id", &self.external_account_id)
            .field("username", &self.username)
            .field("scopes", &self.scopes)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Whether the access token can be used as-is at `now`.
    ///
    /// A connection without an expiry never expires (WhatsApp automation keys,
    /// providers that omit `expires_in`).
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now.timestamp() + TOKEN_EXPIRY_SKEW_SECS < expiry,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Comment,
    Mention,
    Message,
    Other,
}

impl EventType {
    /// Map a webhook change `field` onto the event kind it produces.
    pub fn from_field(field: &str) -> Self {
        match field {
            "comments" | "live_comments" => Self::Comment,
            "mentions" => Self::Mention,
            "messages" | "messaging" => Self::Message,
            _ => Self::Other,
        }
    }
}

/// One verified webhook change, exactly as the platform delivered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub platform: Platform,
    pub platform_user_id: String,
    pub field: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Received,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl FromStr for MessageStatus {
    type Err = KalmaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            "failed" => Ok(Self::Failed),
            other => Err(KalmaError::InvalidRequest(format!(
                "unknown message status: {other}"
            ))),
        }
    }
}

/// Platform-agnostic message as shown in the unified inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedMessage {
    pub id: String,
    pub platform: Platform,
    pub user_id: String,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub is_read: bool,
    pub is_from_me: bool,
    pub status: MessageStatus,
}

/// Document paths. Collections and documents alternate, Firestore style.
pub mod paths {
    use super::Platform;

    pub const USERS: &str = "users";
    pub const EVENTS: &str = "webhookEvents";
    pub const ACCOUNT_INDEX: &str = "platformAccounts";

    pub fn user(user_id: &str) -> String {
        format!("{USERS}/{user_id}")
    }

    pub fn connections(user_id: &str) -> String {
        format!("{USERS}/{user_id}/connections")
    }

    pub fn connection(user_id: &str, platform: Platform) -> String {
        format!("{USERS}/{user_id}/connections/{platform}")
    }

    pub fn messages(user_id: &str) -> String {
        format!("{USERS}/{user_id}/messages")
    }

    pub fn message(user_id: &str, message_id: &str) -> String {
        format!("{USERS}/{user_id}/messages/{message_id}")
    }

    pub fn event(event_id: &str) -> String {
        format!("{EVENTS}/{event_id}")
    }

    pub fn account_index(platform: Platform, external_account_id: &str) -> String {
        format!(
            "{ACCOUNT_INDEX}/{platform}_{}",
            super::sanitize_segment(external_account_id)
        )
    }
}

/// Replace characters that cannot appear inside a single path segment.
pub fn sanitize_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | '.' | '#' | '[' | ']' => '_',
            _ => c,
        })
        .collect()
}

/// Whether `raw` already is one path segment, with nothing to rewrite.
pub fn is_single_segment(raw: &str) -> bool {
    !raw.trim().is_empty() && sanitize_segment(raw) == raw
}

/// Reject user ids that would not stay inside their own `users/{userId}` document.
pub fn validate_user_id(user_id: &str) -> Result<(), KalmaError> {
    if user_id.trim().is_empty() {
        return Err(KalmaError::InvalidRequest("userId is required".into()));
    }
    if !is_single_segment(user_id) {
        return Err(KalmaError::InvalidRequest(
            "userId must not contain '/', '\\', '.', '#', '[' or ']'".into(),
        ));
    }
    Ok(())
}
