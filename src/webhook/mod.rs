//! Platform webhook handshake, authentication and ingestion.
//!
//! A delivery is authenticated over its raw bytes before anything is parsed.
//! Each change inside it becomes one `InboundEvent`; message events whose
//! platform account belongs to a Kalma user are also normalized into that
//! user's inbox.

pub mod signature;

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{
    EventType, InboundEvent, MessageStatus, NormalizedMessage, Platform, is_single_segment, paths,
    sanitize_segment,
};
use crate::oauth::lookup_account_owner;
use crate::store::DocumentStore;

/// Query parameters of the subscription handshake.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Answer a subscription handshake with the challenge to echo back.
///
/// An unconfigured verify token never matches.
pub fn verify_handshake(expected_token: &str, params: &HandshakeParams) -> KalmaResult<String> {
    if params.mode.as_deref() != Some("subscribe") {
        warn!("webhook handshake with mode {:?} rejected", params.mode);
        return Err(KalmaError::VerifyTokenMismatch);
    }
    let given = params.verify_token.as_deref().unwrap_or_default();
    let matches: bool = given.as_bytes().ct_eq(expected_token.as_bytes()).into();
    if expected_token.is_empty() || !matches {
        warn!("webhook handshake with wrong verify token rejected");
        return Err(KalmaError::VerifyTokenMismatch);
    }
    info!("webhook subscription verified");
    Ok(params.challenge.clone().unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    /// Platform account the delivery is about.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
    #[serde(default)]
    pub messaging: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub field: String,
    #[serde(default)]
    pub value: Value,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Outcome of ingesting one delivery.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub events: usize,
    pub messages: usize,
    pub failed: usize,
}

/// Event id for a change. Deterministic ids make redeliveries idempotent.
pub fn event_id(
    platform: Platform,
    entry_id: &str,
    field: &str,
    value: &Value,
    dedup: bool,
) -> String {
    if !dedup {
        return uuid::Uuid::new_v4().to_string();
    }
    let mut hasher = Sha256::new();
    for part in [platform.as_str(), entry_id, field] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Flatten a delivery into events: one per change and one per `messaging` item.
pub fn collect_events(
    platform: Platform,
    payload: &WebhookPayload,
    dedup: bool,
    received_at: DateTime<Utc>,
) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    for entry in &payload.entry {
        for change in &entry.changes {
            events.push(InboundEvent {
                id: event_id(platform, &entry.id, &change.field, &change.value, dedup),
                event_type: EventType::from_field(&change.field),
                platform,
                platform_user_id: entry.id.clone(),
                field: change.field.clone(),
                payload: change.value.clone(),
                received_at,
            });
        }
        for item in &entry.messaging {
            events.push(InboundEvent {
                id: event_id(platform, &entry.id, "messaging", item, dedup),
                event_type: EventType::Message,
                platform,
                platform_user_id: entry.id.clone(),
                field: "messaging".to_string(),
                payload: item.clone(),
                received_at,
            });
        }
    }
    events
}

fn id_at(value: &Value, key: &str) -> Option<String> {
    match value.get(key)?.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Platform timestamps arrive as unix seconds or milliseconds, numeric or string.
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = match value? {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    if raw > 10_000_000_000 {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

/// Build the inbox record for a message event owned by `owner`.
///
/// Returns `None` for message-field events that carry no message (reads,
/// reactions, seen receipts).
pub fn normalize_message(event: &InboundEvent, owner: &str) -> Option<NormalizedMessage> {
    if event.event_type != EventType::Message {
        return None;
    }
    let value = &event.payload;
    let message = value.get("message")?;
    let sender = id_at(value, "sender").unwrap_or_default();
    let recipient = id_at(value, "recipient").unwrap_or_default();

    let is_echo = message
        .get("is_echo")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let is_from_me = is_echo || sender == event.platform_user_id;

    let content = match message.get("text").and_then(Value::as_str) {
        Some(text) => text.to_string(),
        None if message.get("attachments").is_some() => "[attachment]".to_string(),
        None => String::new(),
    };
    let id = message
        .get("mid")
        .and_then(Value::as_str)
        .map_or_else(|| event.id.clone(), sanitize_segment);
    // the thread is keyed by the other participant
    let counterpart = if is_from_me { &recipient } else { &sender };

    Some(NormalizedMessage {
        id,
        platform: event.platform,
        user_id: owner.to_string(),
        thread_id: (!counterpart.is_empty()).then(|| counterpart.clone()),
        sender,
        recipient,
        content,
        timestamp: parse_timestamp(value.get("timestamp")).unwrap_or(event.received_at),
        is_read: false,
        is_from_me,
        status: MessageStatus::Received,
    })
}

async fn store_message(
    store: &dyn DocumentStore,
    platform: Platform,
    event: &InboundEvent,
) -> KalmaResult<bool> {
    let Some(owner) = lookup_account_owner(store, platform, &event.platform_user_id).await? else {
        debug!(
            "no Kalma user owns {} account {}, message not normalized",
            platform, event.platform_user_id
        );
        return Ok(false);
    };
    if !is_single_segment(&owner) {
        warn!(
            "{} account {} is indexed to malformed owner id, message not normalized",
            platform, event.platform_user_id
        );
        return Ok(false);
    }
    let Some(message) = normalize_message(event, &owner) else {
        return Ok(false);
    };
    let value = serde_json::to_value(&message).map_err(KalmaError::persistence)?;
    store.set(&paths::message(&owner, &message.id), value).await?;
    Ok(true)
}

/// Persist every event of an authenticated delivery.
///
/// Store failures are logged and counted, never returned: the platform must
/// still get its acknowledgement.
pub async fn ingest(
    store: &dyn DocumentStore,
    platform: Platform,
    payload: &WebhookPayload,
    dedup: bool,
) -> IngestReport {
    let mut report = IngestReport::default();
    for event in collect_events(platform, payload, dedup, Utc::now()) {
        let value = match serde_json::to_value(&event) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to serialize webhook event {}: {}", event.id, e);
                report.failed += 1;
                continue;
            }
        };
        if let Err(e) = store.set(&paths::event(&event.id), value).await {
            error!("failed to store webhook event {}: {}", event.id, e);
            report.failed += 1;
            continue;
        }
        report.events += 1;

        if event.event_type == EventType::Message {
            match store_message(store, platform, &event).await {
                Ok(true) => report.messages += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("failed to store message for event {}: {}", event.id, e);
                    report.failed += 1;
                }
            }
        }
    }
    report
}

/// Authenticate, parse and ingest one raw delivery.
pub async fn handle_delivery(
    config: &WebhookConfig,
    store: &dyn DocumentStore,
    platform: Platform,
    headers: &HeaderMap,
    body: &[u8],
) -> KalmaResult<IngestReport> {
    if body.len() > config.max_body_bytes {
        warn!("{} webhook payload too large ({} bytes)", platform, body.len());
        return Err(KalmaError::PayloadTooLarge {
            size: body.len(),
            limit: config.max_body_bytes,
        });
    }
    signature::authenticate(&config.app_secret, headers, body)?;

    let payload: WebhookPayload = serde_json::from_slice(body)
        .map_err(|e| KalmaError::InvalidRequest(format!("malformed webhook payload: {e}")))?;
    debug!(
        "{} webhook object={} entries={}",
        platform,
        payload.object,
        payload.entry.len()
    );
    let report = ingest(store, platform, &payload, config.dedup_deliveries).await;
    info!(
        "{} webhook ingested: {} events, {} messages, {} failed",
        platform, report.events, report.messages, report.failed
    );
    Ok(report)
}

#[cfg(test)]
mod tests;
