use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AccountProfile, OAuthProvider, TokenSet};
use crate::config::InstagramConfig;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Connection, Platform};
use crate::utils::http::{MAX_ERROR_BODY_BYTES, limited_text, provider_error_message, upstream_error};

/// Instagram Login (business accounts) + Graph API profile lookup.
///
/// The code exchange yields a short-lived token (about an hour), which is
/// immediately traded for a long-lived one (60 days). Long-lived tokens are
/// refreshed with themselves; there is no separate refresh token.
pub struct InstagramProvider {
    config: InstagramConfig,
    redirect_uri: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ShortLivedToken {
    access_token: String,
    #[serde(default)]
    permissions: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct LongLivedToken {
    access_token: String,
    expires_in: Option<u64>,
}

impl InstagramProvider {
    pub fn new(config: InstagramConfig, redirect_uri: String, client: reqwest::Client) -> Self {
        Self {
            config,
            redirect_uri,
            client,
        }
    }

    fn credentials(&self) -> KalmaResult<(&str, &str)> {
        if self.config.client_id.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "providers.instagram.clientId".into(),
            ));
        }
        if self.config.client_secret.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "providers.instagram.clientSecret".into(),
            ));
        }
        Ok((&self.config.client_id, &self.config.client_secret))
    }

    fn redirect_uri(&self) -> KalmaResult<&str> {
        if self.redirect_uri.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "providers.instagram.redirectUri or gateway.publicUrl".into(),
            ));
        }
        Ok(&self.redirect_uri)
    }

    fn graph_url(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    fn token_error(message: String) -> KalmaError {
        KalmaError::TokenExchange {
            platform: Platform::Instagram.to_string(),
            message,
        }
    }

    /// Read a token endpoint response, mapping non-2xx into `TokenExchange`.
    async fn read_token_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        step: &str,
    ) -> KalmaResult<T> {
        let status = response.status();
        let body = limited_text(response, MAX_ERROR_BODY_BYTES)
            .await
            .map_err(|e| Self::token_error(e.to_string()))?;
        if !status.is_success() {
            warn!("instagram {} returned {}", step, status);
            return Err(Self::token_error(provider_error_message(&body)));
        }
        serde_json::from_str(&body)
            .map_err(|e| Self::token_error(format!("unreadable {step} response: {e}")))
    }

    async fn exchange_long_lived(&self, short_lived: &str) -> KalmaResult<LongLivedToken> {
        let (_, client_secret) = self.credentials()?;
        let response = self
            .client
            .get(self.graph_url("access_token"))
            .query(&[
                ("grant_type", "ig_exchange_token"),
                ("client_secret", client_secret),
                ("access_token", short_lived),
            ])
            .send()
            .await
            .map_err(|e| Self::token_error(format!("graph API unreachable: {e}")))?;
        Self::read_token_response(response, "long-lived token exchange").await
    }
}

#[async_trait]
impl OAuthProvider for InstagramProvider {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn authorize_url(&self, state: &str) -> KalmaResult<url::Url> {
        let (client_id, _) = self.credentials()?;
        let scope = self.config.scopes.join(",");
        url::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", client_id),
                ("redirect_uri", self.redirect_uri()?),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map_err(|e| KalmaError::Config(format!("providers.instagram.authUrl: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> KalmaResult<TokenSet> {
        let (client_id, client_secret) = self.credentials()?;
        let redirect_uri = self.redirect_uri()?;
        // Instagram appends "#_" to the code in the redirect
        let code = code.trim_end_matches("#_");

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
                ("code", code),
            ])
            .send()
            .await
            .map_err(|e| Self::token_error(format!("token endpoint unreachable: {e}")))?;
        let short: ShortLivedToken =
            Self::read_token_response(response, "code exchange").await?;
        debug!("instagram short-lived token obtained, upgrading to long-lived");

        let long = self.exchange_long_lived(&short.access_token).await?;
        let scopes = short
            .permissions
            .map(|p| match p {
                serde_json::Value::String(s) => s.split(',').map(str::to_string).collect(),
                serde_json::Value::Array(items) => items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
                _ => Vec::new(),
            })
            .unwrap_or_default();

        Ok(TokenSet {
            access_token: long.access_token,
            refresh_token: None,
            expires_in: long.expires_in,
            scopes,
        })
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> KalmaResult<AccountProfile> {
        let url = self.graph_url(&format!("{}/me", self.config.api_version));
        let response = self
            .client
            .get(&url)
            .query(&[
                ("fields", "user_id,username,account_type,profile_picture_url"),
                ("access_token", tokens.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("instagram profile request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(upstream_error("instagram", response).await);
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("instagram profile response unreadable: {}", e))?;

        // `user_id` is the professional account id that webhooks carry as entry.id
        let external_account_id = ["user_id", "id"]
            .iter()
            .find_map(|key| match raw.get(*key) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| KalmaError::Upstream {
                platform: "instagram".into(),
                status: 200,
                body: "profile has no user id".into(),
            })?;
        let username = raw
            .get("username")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Ok(AccountProfile {
            external_account_id,
            username,
            raw,
        })
    }

    async fn refresh(&self, connection: &Connection) -> KalmaResult<TokenSet> {
        let response = self
            .client
            .get(self.graph_url("refresh_access_token"))
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", connection.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Self::token_error(format!("graph API unreachable: {e}")))?;
        let long: LongLivedToken = Self::read_token_response(response, "token refresh").await?;
        Ok(TokenSet {
            access_token: long.access_token,
            refresh_token: None,
            expires_in: long.expires_in,
            scopes: connection.scopes.clone(),
        })
    }
}

#[cfg(test)]
mod tests;
