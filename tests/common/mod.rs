// Shared test helpers: not all items used by every test binary.
#![allow(unused)]

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use kalma::config::{
    Config, GatewayConfig, GmailConfig, InstagramConfig, ProvidersConfig, WebhookConfig,
    WhatsAppConfig,
};
use kalma::gateway::{AppState, build_router};
use kalma::store::{DocumentStore, SqliteStore};
use kalma::webhook::signature::{SignatureScheme, sign};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const APP_SECRET: &str = "ig-app-secret";
pub const VERIFY_TOKEN: &str = "kalma-verify";
pub const IG_ACCOUNT: &str = "17841400000000000";

/// Config with every provider endpoint pointed at `base` (a wiremock server).
pub fn config_for(base: &str) -> Config {
    Config {
        gateway: GatewayConfig {
            public_url: "https://bridge.kalma.io".into(),
            ..GatewayConfig::default()
        },
        providers: ProvidersConfig {
            gmail: GmailConfig {
                client_id: "gmail-client".into(),
                client_secret: "gmail-secret".into(),
                token_url: format!("{base}/token"),
                api_base: format!("{base}/gmail/v1"),
                ..GmailConfig::default()
            },
            instagram: InstagramConfig {
                client_id: "ig-client".into(),
                client_secret: "ig-secret".into(),
                token_url: format!("{base}/oauth/access_token"),
                graph_base: base.to_string(),
                ..InstagramConfig::default()
            },
        },
        webhook: WebhookConfig {
            verify_token: VERIFY_TOKEN.into(),
            app_secret: APP_SECRET.into(),
            ..WebhookConfig::default()
        },
        whatsapp: WhatsAppConfig {
            automation_webhook_url: format!("{base}/hooks/whatsapp"),
            api_key: String::new(),
        },
        ..Config::default()
    }
}

pub struct TestApp {
    pub state: AppState,
    pub db_path: std::path::PathBuf,
    _dir: TempDir,
}

impl TestApp {
    /// Gateway state over a fresh SQLite store in a temp dir.
    pub fn new(config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("kalma.db");
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&db_path).unwrap());
        let state = AppState::new(config, store, &reqwest::Client::new());
        Self {
            state,
            db_path,
            _dir: dir,
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.state.store.as_ref()
    }

    pub async fn call(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
        let resp = build_router(self.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        (status, headers, body)
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// A webhook delivery signed the way Instagram signs it (`X-Hub-Signature`, SHA-1).
pub fn signed_webhook(payload: &serde_json::Value, secret: &str) -> Request<Body> {
    let body = payload.to_string().into_bytes();
    let signature = sign(SignatureScheme::Sha1, secret, &body).unwrap();
    Request::builder()
        .method("POST")
        .uri("/api/webhook/instagram")
        .header("content-type", "application/json")
        .header("x-hub-signature", signature)
        .body(Body::from(body))
        .unwrap()
}

pub fn location(headers: &HeaderMap) -> String {
    headers["location"].to_str().unwrap().to_string()
}

pub fn json(body: &Bytes) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

/// One inbound DM from `sender` to the connected Instagram account.
pub fn inbound_dm(sender: &str, mid: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "instagram",
        "entry": [{
            "id": IG_ACCOUNT,
            "time": 1_718_000_000,
            "messaging": [{
                "sender": {"id": sender},
                "recipient": {"id": IG_ACCOUNT},
                "timestamp": 1_718_000_000_000_i64,
                "message": {"mid": mid, "text": text}
            }]
        }]
    })
}
