use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{AccountProfile, OAuthProvider, TokenSet};
use crate::config::GmailConfig;
use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Connection, Platform};
use crate::utils::http::{MAX_ERROR_BODY_BYTES, limited_text, provider_error_message, upstream_error};

/// Google OAuth 2.0 + Gmail profile lookup.
pub struct GmailProvider {
    config: GmailConfig,
    redirect_uri: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl GmailProvider {
    pub fn new(config: GmailConfig, redirect_uri: String, client: reqwest::Client) -> Self {
        Self {
            config,
            redirect_uri,
            client,
        }
    }

    fn credentials(&self) -> KalmaResult<(&str, &str)> {
        if self.config.client_id.is_empty() {
            return Err(KalmaError::ConfigMissing("providers.gmail.clientId".into()));
        }
        if self.config.client_secret.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "providers.gmail.clientSecret".into(),
            ));
        }
        Ok((&self.config.client_id, &self.config.client_secret))
    }

    fn redirect_uri(&self) -> KalmaResult<&str> {
        if self.redirect_uri.is_empty() {
            return Err(KalmaError::ConfigMissing(
                "providers.gmail.redirectUri or gateway.publicUrl".into(),
            ));
        }
        Ok(&self.redirect_uri)
    }

    /// POST a form to the token endpoint and decode the token response.
    async fn token_request(&self, form: &[(&str, &str)]) -> KalmaResult<TokenSet> {
        let token_error = |message: String| KalmaError::TokenExchange {
            platform: Platform::Gmail.to_string(),
            message,
        };

        let response = self
            .client
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| token_error(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        let body = limited_text(response, MAX_ERROR_BODY_BYTES)
            .await
            .map_err(|e| token_error(e.to_string()))?;
        if !status.is_success() {
            warn!("gmail token endpoint returned {}", status);
            return Err(token_error(provider_error_message(&body)));
        }

        let parsed: GoogleTokenResponse = serde_json::from_str(&body)
            .map_err(|e| token_error(format!("unreadable token response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(token_error(parsed.error_description.unwrap_or(error)));
        }
        let access_token = parsed
            .access_token
            .ok_or_else(|| token_error("missing access_token".into()))?;

        Ok(TokenSet {
            access_token,
            refresh_token: parsed.refresh_token,
            expires_in: parsed.expires_in,
            scopes: parsed
                .scope
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl OAuthProvider for GmailProvider {
    fn platform(&self) -> Platform {
        Platform::Gmail
    }

    fn authorize_url(&self, state: &str) -> KalmaResult<url::Url> {
        let (client_id, _) = self.credentials()?;
        let scope = self.config.scopes.join(" ");
        url::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", client_id),
                ("redirect_uri", self.redirect_uri()?),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                // offline + consent so Google issues a refresh token on every connect
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
                ("state", state),
            ],
        )
        .map_err(|e| KalmaError::Config(format!("providers.gmail.authUrl: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> KalmaResult<TokenSet> {
        let (client_id, client_secret) = self.credentials()?;
        let redirect_uri = self.redirect_uri()?;
        debug!("exchanging gmail authorization code");
        self.token_request(&[
            ("code", code),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn fetch_profile(&self, tokens: &TokenSet) -> KalmaResult<AccountProfile> {
        let url = format!(
            "{}/users/me/profile",
            self.config.api_base.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&tokens.access_token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("gmail profile request failed: {}", e))?;
        if !response.status().is_success() {
            return Err(upstream_error("gmail", response).await);
        }
        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("gmail profile response unreadable: {}", e))?;
        let email = raw
            .get("emailAddress")
            .and_then(|v| v.as_str())
            .ok_or_else(|| KalmaError::Upstream {
                platform: "gmail".into(),
                status: 200,
                body: "profile has no emailAddress".into(),
            })?
            .to_string();
        Ok(AccountProfile {
            external_account_id: email.clone(),
            username: Some(email),
            raw,
        })
    }

    async fn refresh(&self, connection: &Connection) -> KalmaResult<TokenSet> {
        let (client_id, client_secret) = self.credentials()?;
        let refresh_token =
            connection
                .refresh_token
                .as_deref()
                .ok_or_else(|| KalmaError::TokenExchange {
                    platform: "gmail".into(),
                    message: "no refresh token available; reconnect the account".into(),
                })?;
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
        ])
        .await
    }
}
