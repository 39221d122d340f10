//! OAuth connection flow shared by every platform that has one.
//!
//! A provider knows how to build its authorization URL, trade a code for
//! tokens, read the connected account's profile and refresh tokens. The
//! flow functions in this module tie a provider to the document store.

pub mod gmail;
pub mod instagram;
pub mod state;

pub use gmail::GmailProvider;
pub use instagram::InstagramProvider;
pub use state::OAuthState;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Connection, Platform, paths, validate_user_id};
use crate::store::DocumentStore;

/// Tokens returned by a provider's token endpoint.
#[derive(Clone, Default)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds as reported by the provider.
    pub expires_in: Option<u64>,
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl TokenSet {
    /// Absolute expiry (unix seconds) relative to `now`.
    pub fn expiry_from(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now.timestamp().saturating_add(secs))
    }
}

/// The external account a token set belongs to.
#[derive(Debug, Clone)]
pub struct AccountProfile {
    pub external_account_id: String,
    pub username: Option<String>,
    /// Profile response as returned by the provider.
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Provider consent page for a flow carrying `state`.
    fn authorize_url(&self, state: &str) -> KalmaResult<url::Url>;

    /// Trade an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> KalmaResult<TokenSet>;

    async fn fetch_profile(&self, tokens: &TokenSet) -> KalmaResult<AccountProfile>;

    /// Obtain a fresh access token for a stored connection.
    async fn refresh(&self, connection: &Connection) -> KalmaResult<TokenSet>;
}

/// OAuth providers by platform, built once per process.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config, client: &reqwest::Client) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(GmailProvider::new(
            config.providers.gmail.clone(),
            config.redirect_uri(Platform::Gmail).unwrap_or_default(),
            client.clone(),
        )));
        registry.register(Arc::new(InstagramProvider::new(
            config.providers.instagram.clone(),
            config.redirect_uri(Platform::Instagram).unwrap_or_default(),
            client.clone(),
        )));
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn get(&self, platform: Platform) -> KalmaResult<Arc<dyn OAuthProvider>> {
        self.providers.get(&platform).cloned().ok_or_else(|| {
            KalmaError::InvalidRequest(format!("{platform} does not support OAuth"))
        })
    }
}

/// Run the callback half of the flow: decode state, exchange the code,
/// read the profile and persist the connection.
///
/// Nothing is written to the store unless every provider call succeeds.
pub async fn complete_connection(
    provider: &dyn OAuthProvider,
    store: &dyn DocumentStore,
    code: &str,
    raw_state: &str,
) -> KalmaResult<Connection> {
    let oauth_state = state::decode(raw_state)?;
    let platform = provider.platform();
    if let Some(bound) = oauth_state.platform
        && bound != platform
    {
        return Err(KalmaError::InvalidState(format!(
            "state was issued for {bound}, not {platform}"
        )));
    }

    let tokens = provider.exchange_code(code).await?;
    debug!(
        "{} token exchange ok for user {}, expires_in={:?}",
        platform, oauth_state.user_id, tokens.expires_in
    );
    let profile = provider.fetch_profile(&tokens).await?;

    let now = Utc::now();
    let connection = Connection {
        user_id: oauth_state.user_id,
        platform,
        expiry: tokens.expiry_from(now),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        external_account_id: profile.external_account_id,
        username: profile.username,
        scopes: tokens.scopes,
        profile: profile.raw,
        connected_at: now,
        updated_at: now,
    };
    persist_connection(store, &connection).await?;
    info!(
        "connected {} account {} for user {}",
        platform, connection.external_account_id, connection.user_id
    );
    Ok(connection)
}

/// Write the connection, its reverse index and the user's integration summary.
///
/// The connection document is overwritten on reconnect.
pub async fn persist_connection(
    store: &dyn DocumentStore,
    connection: &Connection,
) -> KalmaResult<()> {
    validate_user_id(&connection.user_id)?;
    let platform = connection.platform;
    let value = serde_json::to_value(connection).map_err(KalmaError::persistence)?;
    store
        .set(&paths::connection(&connection.user_id, platform), value)
        .await?;
    store
        .set(
            &paths::account_index(platform, &connection.external_account_id),
            serde_json::json!({
                "userId": connection.user_id,
                "platform": platform,
                "externalAccountId": connection.external_account_id,
            }),
        )
        .await?;
    store
        .update(
            &paths::user(&connection.user_id),
            serde_json::json!({
                "integrations": {
                    platform.as_str(): {
                        "connected": true,
                        "externalAccountId": connection.external_account_id,
                        "connectedAt": connection.connected_at,
                    }
                }
            }),
        )
        .await
}

pub async fn load_connection(
    store: &dyn DocumentStore,
    user_id: &str,
    platform: Platform,
) -> KalmaResult<Option<Connection>> {
    store
        .get(&paths::connection(user_id, platform))
        .await?
        .map(|doc| serde_json::from_value(doc).map_err(KalmaError::persistence))
        .transpose()
}

/// Kalma user owning a platform account, if that account was ever connected.
pub async fn lookup_account_owner(
    store: &dyn DocumentStore,
    platform: Platform,
    external_account_id: &str,
) -> KalmaResult<Option<String>> {
    Ok(store
        .get(&paths::account_index(platform, external_account_id))
        .await?
        .and_then(|doc| doc.get("userId").and_then(|v| v.as_str()).map(str::to_string)))
}

/// Return a connection whose access token is usable now, refreshing it first if needed.
///
/// A refreshed token is merged back into the stored connection. The previous
/// refresh token is kept when the provider does not rotate it.
pub async fn ensure_fresh(
    provider: &dyn OAuthProvider,
    store: &dyn DocumentStore,
    connection: Connection,
) -> KalmaResult<Connection> {
    if connection.is_valid() {
        return Ok(connection);
    }
    debug!(
        "{} token for user {} expired, refreshing",
        connection.platform, connection.user_id
    );
    let tokens = provider.refresh(&connection).await?;
    let now = Utc::now();
    let refreshed = Connection {
        expiry: tokens.expiry_from(now),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.or(connection.refresh_token),
        updated_at: now,
        ..connection
    };
    store
        .update(
            &paths::connection(&refreshed.user_id, refreshed.platform),
            serde_json::json!({
                "accessToken": refreshed.access_token,
                "refreshToken": refreshed.refresh_token,
                "expiry": refreshed.expiry,
                "updatedAt": refreshed.updated_at,
            }),
        )
        .await?;
    info!(
        "refreshed {} token for user {}",
        refreshed.platform, refreshed.user_id
    );
    Ok(refreshed)
}
