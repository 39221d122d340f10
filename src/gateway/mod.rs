//! HTTP surface of the bridge.
//!
//! OAuth start/callback redirects, the Instagram webhook endpoint, outbound
//! sends and inbox status flips, all over one shared `AppState`.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::KalmaError;
use crate::models::{self, MessageStatus, Platform};
use crate::oauth::{self, OAuthState, ProviderRegistry};
use crate::send::{Dispatcher, SendRequest, SendResponse};
use crate::store::DocumentStore;
use crate::webhook::{self, HandshakeParams};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn DocumentStore>,
    pub providers: ProviderRegistry,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Wire providers and senders from config over one HTTP client.
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, client: &reqwest::Client) -> Self {
        let providers = ProviderRegistry::from_config(&config, client);
        let dispatcher = Dispatcher::from_config(&config, store.clone(), providers.clone(), client);
        Self {
            config: Arc::new(config),
            store,
            providers,
            dispatcher: Arc::new(dispatcher),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartParams {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: MessageStatus,
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.webhook.max_body_bytes;
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/auth/{platform}/start", get(oauth_start_handler))
        .route("/auth/{platform}/callback", get(oauth_callback_handler))
        .route(
            "/api/webhook/instagram",
            get(webhook_handshake_handler).post(webhook_delivery_handler),
        )
        .route("/api/messages/send", post(send_handler))
        .route(
            "/api/messages/{user_id}/{message_id}/read",
            post(mark_read_handler),
        )
        .route(
            "/api/messages/{user_id}/{message_id}/status",
            post(update_status_handler),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// GET /api/health: health check endpoint.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

/// GET /auth/{platform}/start: redirect the user to the provider consent page.
async fn oauth_start_handler(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Redirect, KalmaError> {
    let platform: Platform = platform.parse()?;
    let user_id = params
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| KalmaError::InvalidRequest("userId is required".into()))?;
    models::validate_user_id(&user_id)?;
    let provider = state.providers.get(platform)?;
    let encoded = oauth::state::encode(&OAuthState::for_flow(&user_id, platform));
    let url = provider.authorize_url(&encoded)?;
    debug!("starting {} OAuth flow for user {}", platform, user_id);
    Ok(Redirect::to(url.as_str()))
}

fn with_query(base: &str, pairs: &[(&str, &str)]) -> String {
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}{query}")
}

fn success_redirect(config: &Config, platform: Platform) -> Redirect {
    Redirect::to(&with_query(
        &config.oauth.success_redirect,
        &[("platform", platform.as_str()), ("status", "success")],
    ))
}

fn error_redirect(config: &Config, platform: Platform, message: &str) -> Redirect {
    Redirect::to(&with_query(
        &config.oauth.error_redirect,
        &[
            ("platform", platform.as_str()),
            ("status", "error"),
            ("message", message),
        ],
    ))
}

/// GET /auth/{platform}/callback: finish the flow and redirect to the app.
async fn oauth_callback_handler(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let platform: Platform = match platform.parse() {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    if let Some(error) = params.error {
        let message = params.error_description.unwrap_or(error);
        warn!("{} OAuth denied by provider: {}", platform, message);
        return error_redirect(&state.config, platform, &message).into_response();
    }

    let (Some(code), Some(raw_state)) = (params.code, params.state) else {
        return KalmaError::InvalidRequest("code and state are required".into()).into_response();
    };
    let provider = match state.providers.get(platform) {
        Ok(p) => p,
        Err(e) => return e.into_response(),
    };

    match oauth::complete_connection(provider.as_ref(), state.store.as_ref(), &code, &raw_state)
        .await
    {
        Ok(_) => success_redirect(&state.config, platform).into_response(),
        Err(e @ (KalmaError::ConfigMissing(_) | KalmaError::Config(_))) => e.into_response(),
        Err(e) => {
            warn!("{} OAuth callback failed: {}", platform, e);
            error_redirect(&state.config, platform, &e.public_message()).into_response()
        }
    }
}

/// GET /api/webhook/instagram: subscription handshake.
async fn webhook_handshake_handler(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
) -> Response {
    match webhook::verify_handshake(&state.config.webhook.verify_token, &params) {
        Ok(challenge) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            challenge,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/webhook/instagram: receive a signed delivery.
async fn webhook_delivery_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, KalmaError> {
    webhook::handle_delivery(
        &state.config.webhook,
        state.store.as_ref(),
        Platform::Instagram,
        &headers,
        &body,
    )
    .await?;
    Ok(Json(serde_json::json!({"success": true})))
}

/// POST /api/messages/send: send one message on behalf of a user.
async fn send_handler(
    State(state): State<AppState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> (StatusCode, Json<SendResponse>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let err = KalmaError::InvalidRequest(rejection.body_text());
            return (err.status_code(), Json(SendResponse::failed(&err)));
        }
    };
    match state.dispatcher.send_message(&request).await {
        Ok(sent) => (StatusCode::OK, Json(SendResponse::sent(sent.message_id))),
        Err(e) => (e.status_code(), Json(SendResponse::failed(&e))),
    }
}

async fn mark_read_handler(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, KalmaError> {
    state.dispatcher.mark_read(&user_id, &message_id).await?;
    Ok(Json(serde_json::json!({"success": true})))
}

async fn update_status_handler(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(String, String)>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<serde_json::Value>, KalmaError> {
    let Json(update) = body.map_err(|r| KalmaError::InvalidRequest(r.body_text()))?;
    state
        .dispatcher
        .update_status(&user_id, &message_id, update.status)
        .await?;
    Ok(Json(serde_json::json!({"success": true})))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Bind and serve the gateway until ctrl-c.
pub async fn serve(state: AppState, host: &str, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("kalma gateway listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")
}
