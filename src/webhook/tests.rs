use super::signature::{SHA1_HEADER, SignatureScheme, sign};
use super::*;
use crate::store::MemoryStore;
use async_trait::async_trait;
use axum::http::HeaderValue;
use serde_json::json;

const SECRET: &str = "ig-app-secret";
const ACCOUNT: &str = "17841400000000000";

fn config() -> WebhookConfig {
    WebhookConfig {
        verify_token: "verify-me".into(),
        app_secret: SECRET.into(),
        ..WebhookConfig::default()
    }
}

fn signed_headers(body: &[u8]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        SHA1_HEADER,
        HeaderValue::from_str(&sign(SignatureScheme::Sha1, SECRET, body).unwrap()).unwrap(),
    );
    headers
}

fn delivery() -> Value {
    json!({
        "object": "instagram",
        "entry": [{
            "id": ACCOUNT,
            "time": 1_718_000_000,
            "changes": [
                {"field": "comments", "value": {"id": "c1", "text": "love it", "from": {"id": "99"}}},
                {"field": "mentions", "value": {"media_id": "m1", "comment_id": "c2"}},
                {"field": "story_insights", "value": {"media_id": "m2", "reach": 10}}
            ],
            "messaging": [{
                "sender": {"id": "555"},
                "recipient": {"id": ACCOUNT},
                "timestamp": 1_718_000_000_123_i64,
                "message": {"mid": "aWdfZAG1faXRlbToxOklH", "text": "is this in stock?"}
            }]
        }]
    })
}

async fn index_account(store: &MemoryStore, user: &str) {
    store
        .set(
            &paths::account_index(Platform::Instagram, ACCOUNT),
            json!({"userId": user, "platform": "instagram", "externalAccountId": ACCOUNT}),
        )
        .await
        .unwrap();
}

#[test]
fn test_handshake_echoes_challenge() {
    let params = HandshakeParams {
        mode: Some("subscribe".into()),
        verify_token: Some("verify-me".into()),
        challenge: Some("1158201444".into()),
    };
    assert_eq!(verify_handshake("verify-me", &params).unwrap(), "1158201444");
}

#[test]
fn test_handshake_rejects_mismatch_mode_and_unconfigured() {
    let wrong_token = HandshakeParams {
        mode: Some("subscribe".into()),
        verify_token: Some("nope".into()),
        challenge: Some("1".into()),
    };
    assert!(matches!(
        verify_handshake("verify-me", &wrong_token),
        Err(KalmaError::VerifyTokenMismatch)
    ));

    let wrong_mode = HandshakeParams {
        mode: Some("unsubscribe".into()),
        verify_token: Some("verify-me".into()),
        challenge: Some("1".into()),
    };
    assert!(verify_handshake("verify-me", &wrong_mode).is_err());

    let empty = HandshakeParams {
        mode: Some("subscribe".into()),
        verify_token: Some(String::new()),
        challenge: Some("1".into()),
    };
    assert!(verify_handshake("", &empty).is_err());
}

#[test]
fn test_collect_events_dispatches_on_field() {
    let payload: WebhookPayload = serde_json::from_value(delivery()).unwrap();
    let events = collect_events(Platform::Instagram, &payload, true, Utc::now());
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        types,
        vec![
            EventType::Comment,
            EventType::Mention,
            EventType::Other,
            EventType::Message
        ]
    );
    assert!(events.iter().all(|e| e.platform_user_id == ACCOUNT));
    assert_eq!(events[3].field, "messaging");
}

#[test]
fn test_entry_id_may_be_numeric() {
    let payload: WebhookPayload =
        serde_json::from_value(json!({"object": "instagram", "entry": [{"id": 42, "changes": []}]}))
            .unwrap();
    assert_eq!(payload.entry[0].id, "42");
}

#[test]
fn test_event_id_deterministic_only_with_dedup() {
    let value = json!({"id": "c1"});
    let a = event_id(Platform::Instagram, ACCOUNT, "comments", &value, true);
    let b = event_id(Platform::Instagram, ACCOUNT, "comments", &value, true);
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(
        a,
        event_id(Platform::Instagram, ACCOUNT, "mentions", &value, true)
    );
    assert_ne!(
        event_id(Platform::Instagram, ACCOUNT, "comments", &value, false),
        event_id(Platform::Instagram, ACCOUNT, "comments", &value, false)
    );
}

#[test]
fn test_normalize_inbound_message() {
    let payload: WebhookPayload = serde_json::from_value(delivery()).unwrap();
    let events = collect_events(Platform::Instagram, &payload, true, Utc::now());
    let msg = normalize_message(&events[3], "u1").unwrap();
    assert_eq!(msg.user_id, "u1");
    assert_eq!(msg.sender, "555");
    assert_eq!(msg.recipient, ACCOUNT);
    assert_eq!(msg.content, "is this in stock?");
    assert_eq!(msg.thread_id.as_deref(), Some("555"));
    assert_eq!(msg.timestamp.timestamp_millis(), 1_718_000_000_123);
    assert!(!msg.is_from_me);
    assert!(!msg.is_read);
    assert_eq!(msg.status, MessageStatus::Received);
}

#[test]
fn test_normalize_echo_is_from_me() {
    let event = InboundEvent {
        id: "e1".into(),
        event_type: EventType::Message,
        platform: Platform::Instagram,
        platform_user_id: ACCOUNT.into(),
        field: "messages".into(),
        payload: json!({
            "sender": {"id": ACCOUNT},
            "recipient": {"id": "555"},
            "timestamp": "1718000000",
            "message": {"mid": "m.2", "text": "yes!", "is_echo": true}
        }),
        received_at: Utc::now(),
    };
    let msg = normalize_message(&event, "u1").unwrap();
    assert!(msg.is_from_me);
    assert_eq!(msg.thread_id.as_deref(), Some("555"));
    assert_eq!(msg.id, "m_2");
    assert_eq!(msg.timestamp.timestamp(), 1_718_000_000);
}

#[test]
fn test_normalize_skips_non_message_payloads() {
    let event = InboundEvent {
        id: "e1".into(),
        event_type: EventType::Message,
        platform: Platform::Instagram,
        platform_user_id: ACCOUNT.into(),
        field: "messaging".into(),
        payload: json!({"sender": {"id": "555"}, "read": {"mid": "m1"}}),
        received_at: Utc::now(),
    };
    assert!(normalize_message(&event, "u1").is_none());
}

#[tokio::test]
async fn test_handle_delivery_stores_events_and_messages() {
    let store = MemoryStore::new();
    index_account(&store, "u1").await;
    let body = serde_json::to_vec(&delivery()).unwrap();

    let report = handle_delivery(
        &config(),
        &store,
        Platform::Instagram,
        &signed_headers(&body),
        &body,
    )
    .await
    .unwrap();
    assert_eq!(
        report,
        IngestReport {
            events: 4,
            messages: 1,
            failed: 0
        }
    );
    assert_eq!(store.list(paths::EVENTS).await.unwrap().len(), 4);
    let messages = store.list(&paths::messages("u1")).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1["content"], "is this in stock?");
}

#[tokio::test]
async fn test_unowned_account_stores_events_only() {
    let store = MemoryStore::new();
    let body = serde_json::to_vec(&delivery()).unwrap();
    let report = handle_delivery(
        &config(),
        &store,
        Platform::Instagram,
        &signed_headers(&body),
        &body,
    )
    .await
    .unwrap();
    assert_eq!(report.events, 4);
    assert_eq!(report.messages, 0);
}

#[tokio::test]
async fn test_malformed_owner_id_is_not_normalized() {
    let store = MemoryStore::new();
    index_account(&store, "victim/messages/m1").await;
    let body = serde_json::to_vec(&delivery()).unwrap();
    let report = handle_delivery(
        &config(),
        &store,
        Platform::Instagram,
        &signed_headers(&body),
        &body,
    )
    .await
    .unwrap();
    assert_eq!(report.events, 4);
    assert_eq!(report.messages, 0);
    assert!(store.list("users/victim/messages/m1/messages").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_redelivery_with_dedup_is_idempotent() {
    let store = MemoryStore::new();
    let body = serde_json::to_vec(&delivery()).unwrap();
    for _ in 0..2 {
        handle_delivery(
            &config(),
            &store,
            Platform::Instagram,
            &signed_headers(&body),
            &body,
        )
        .await
        .unwrap();
    }
    assert_eq!(store.list(paths::EVENTS).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_redelivery_without_dedup_duplicates() {
    let store = MemoryStore::new();
    let config = WebhookConfig {
        dedup_deliveries: false,
        ..config()
    };
    let body = serde_json::to_vec(&delivery()).unwrap();
    for _ in 0..2 {
        handle_delivery(
            &config,
            &store,
            Platform::Instagram,
            &signed_headers(&body),
            &body,
        )
        .await
        .unwrap();
    }
    assert_eq!(store.list(paths::EVENTS).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_forged_signature_writes_nothing() {
    let store = MemoryStore::new();
    let body = serde_json::to_vec(&delivery()).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert(
        SHA1_HEADER,
        HeaderValue::from_str(&sign(SignatureScheme::Sha1, "wrong", &body).unwrap()).unwrap(),
    );
    let err = handle_delivery(&config(), &store, Platform::Instagram, &headers, &body)
        .await
        .unwrap_err();
    assert!(matches!(err, KalmaError::SignatureInvalid));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_oversized_and_malformed_bodies() {
    let store = MemoryStore::new();
    let small = WebhookConfig {
        max_body_bytes: 8,
        ..config()
    };
    let body = serde_json::to_vec(&delivery()).unwrap();
    assert!(matches!(
        handle_delivery(&small, &store, Platform::Instagram, &signed_headers(&body), &body).await,
        Err(KalmaError::PayloadTooLarge { .. })
    ));

    let garbage = b"not json";
    assert!(matches!(
        handle_delivery(
            &config(),
            &store,
            Platform::Instagram,
            &signed_headers(garbage),
            garbage
        )
        .await,
        Err(KalmaError::InvalidRequest(_))
    ));
    assert!(store.is_empty());
}

struct BrokenStore;

#[async_trait]
impl DocumentStore for BrokenStore {
    async fn get(&self, _path: &str) -> KalmaResult<Option<Value>> {
        Err(KalmaError::Persistence("disk full".into()))
    }
    async fn set(&self, _path: &str, _value: Value) -> KalmaResult<()> {
        Err(KalmaError::Persistence("disk full".into()))
    }
    async fn update(&self, _path: &str, _patch: Value) -> KalmaResult<()> {
        Err(KalmaError::Persistence("disk full".into()))
    }
    async fn list(&self, _collection: &str) -> KalmaResult<Vec<(String, Value)>> {
        Err(KalmaError::Persistence("disk full".into()))
    }
}

#[tokio::test]
async fn test_store_failures_are_counted_not_returned() {
    let body = serde_json::to_vec(&delivery()).unwrap();
    let report = handle_delivery(
        &config(),
        &BrokenStore,
        Platform::Instagram,
        &signed_headers(&body),
        &body,
    )
    .await
    .unwrap();
    assert_eq!(report.events, 0);
    assert_eq!(report.failed, 4);
}
