use anyhow::{Context, Result, bail};
use std::path::Path;
use tracing::info;

use crate::config::{Config, credentials, load_config};
use crate::gateway::{self, AppState};
use crate::models::{self, Connection, Platform, paths};
use crate::oauth::{OAuthState, state};
use crate::send::{SendRequest, SendResponse};
use crate::store::{DocumentStore, open_store};
use crate::utils::http::default_http_client;

fn app_state(config: Config) -> Result<AppState> {
    let store = open_store(&config.store).context("failed to open document store")?;
    Ok(AppState::new(config, store, &default_http_client()))
}

pub(super) async fn serve(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let host = host.unwrap_or_else(|| config.gateway.host.clone());
    let port = port.unwrap_or(config.gateway.port);
    for name in credentials::missing_credentials(&config) {
        info!("credential {} is not configured", name);
    }
    let state = app_state(config)?;
    gateway::serve(state, &host, port).await
}

pub(super) fn encode_state(user_id: &str, platform: Option<&str>) -> Result<String> {
    models::validate_user_id(user_id)?;
    let oauth_state = match platform {
        Some(p) => OAuthState::for_flow(user_id, p.parse::<Platform>()?),
        None => OAuthState::new(user_id),
    };
    Ok(state::encode(&oauth_state))
}

pub(super) fn decode_state(raw: &str) -> Result<String> {
    let decoded = state::decode(raw)?;
    Ok(serde_json::to_string_pretty(&decoded)?)
}

/// One line per connection; tokens are never printed.
pub(super) async fn connection_lines(
    store: &dyn DocumentStore,
    user_id: &str,
) -> Result<Vec<String>> {
    models::validate_user_id(user_id)?;
    let mut lines = Vec::new();
    for (id, doc) in store.list(&paths::connections(user_id)).await? {
        let line = match serde_json::from_value::<Connection>(doc) {
            Ok(conn) => format!(
                "{:<10} {:<32} {:<8} refresh={} expiry={}",
                conn.platform.as_str(),
                conn.username
                    .as_deref()
                    .unwrap_or(conn.external_account_id.as_str()),
                if conn.is_valid() { "valid" } else { "expired" },
                if conn.refresh_token.is_some() { "yes" } else { "no" },
                conn.expiry
                    .map_or_else(|| "never".to_string(), |e| e.to_string()),
            ),
            Err(e) => format!("{:<10} unreadable connection document: {}", id, e),
        };
        lines.push(line);
    }
    Ok(lines)
}

pub(super) async fn connections(config_path: Option<&Path>, user_id: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let store = open_store(&config.store)?;
    let lines = connection_lines(store.as_ref(), user_id).await?;
    if lines.is_empty() {
        println!("No connections for user {}", user_id);
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

pub(super) async fn send(config_path: Option<&Path>, request: &SendRequest) -> Result<()> {
    let state = app_state(load_config(config_path)?)?;
    let response = match state.dispatcher.send_message(request).await {
        Ok(sent) => SendResponse::sent(sent.message_id),
        Err(e) => SendResponse::failed(&e),
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        bail!("send failed");
    }
    Ok(())
}

pub(super) fn config_check(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("Configuration OK");
    println!("  gateway:  {}:{}", config.gateway.host, config.gateway.port);
    println!("  store:    {} ({})", config.store.backend, config.store.path);
    for platform in [Platform::Gmail, Platform::Instagram] {
        match config.redirect_uri(platform) {
            Ok(uri) => println!("  {:<9} redirect {}", format!("{platform}:"), uri),
            Err(e) => println!("  {:<9} {}", format!("{platform}:"), e),
        }
    }
    let missing = credentials::missing_credentials(&config);
    if missing.is_empty() {
        println!("  all credentials set");
    } else {
        println!("  empty credentials: {}", missing.join(", "));
    }
    Ok(())
}
