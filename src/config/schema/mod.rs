use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::KalmaError;
use crate::models::Platform;

/// Generates a `Debug` impl that redacts secret fields.
///
/// Field specifiers:
/// - `field_name`           : printed normally via `&self.field_name`
/// - `redact(field_name)`   : `String` field: shows `[empty]` or `[REDACTED]`
macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

// Submodules: declared after the macro so they can use `redact_debug!`
mod providers;

pub use providers::*;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    18800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used to derive OAuth redirect URIs.
    #[serde(default, rename = "publicUrl")]
    pub public_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// OAuth redirects
// ---------------------------------------------------------------------------

fn default_success_redirect() -> String {
    "https://app.kalma.io/integrations/success".to_string()
}

fn default_error_redirect() -> String {
    "https://app.kalma.io/integrations/error".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_success_redirect", rename = "successRedirect")]
    pub success_redirect: String,
    #[serde(default = "default_error_redirect", rename = "errorRedirect")]
    pub error_redirect: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            success_redirect: default_success_redirect(),
            error_redirect: default_error_redirect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

fn default_max_body_bytes() -> usize {
    1_048_576
}

/// Instagram / Graph API webhook receiver at `/api/webhook/instagram`.
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Token the platform echoes during the subscription handshake.
    #[serde(default, rename = "verifyToken")]
    pub verify_token: String,
    /// App secret used as the HMAC key for `X-Hub-Signature` headers.
    #[serde(default, rename = "appSecret")]
    pub app_secret: String,
    /// Derive event ids from content so redeliveries overwrite instead of duplicating.
    #[serde(default = "default_true", rename = "dedupDeliveries")]
    pub dedup_deliveries: bool,
    #[serde(default = "default_max_body_bytes", rename = "maxBodyBytes")]
    pub max_body_bytes: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            app_secret: String::new(),
            dedup_deliveries: true,
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

redact_debug!(
    WebhookConfig,
    redact(verify_token),
    redact(app_secret),
    dedup_deliveries,
    max_body_bytes,
);

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

fn default_store_backend() -> String {
    "sqlite".to_string()
}

fn default_store_path() -> String {
    "~/.kalma/kalma.db".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" (default) or "memory".
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// OAuth redirect URI registered with the provider for `platform`.
    ///
    /// An explicit `redirectUri` wins; otherwise it is derived from `gateway.publicUrl`.
    pub fn redirect_uri(&self, platform: Platform) -> Result<String, KalmaError> {
        let explicit = match platform {
            Platform::Gmail => &self.providers.gmail.redirect_uri,
            Platform::Instagram => &self.providers.instagram.redirect_uri,
            Platform::WhatsApp => {
                return Err(KalmaError::InvalidRequest(
                    "whatsapp has no OAuth flow".into(),
                ));
            }
        };
        if !explicit.is_empty() {
            return Ok(explicit.clone());
        }
        if self.gateway.public_url.is_empty() {
            return Err(KalmaError::ConfigMissing(format!(
                "providers.{platform}.redirectUri or gateway.publicUrl"
            )));
        }
        Ok(format!(
            "{}/auth/{}/callback",
            self.gateway.public_url.trim_end_matches('/'),
            platform
        ))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), KalmaError> {
        self.validate_gateway()?;
        self.validate_oauth()?;
        self.validate_webhook()?;
        self.validate_store()?;
        self.validate_providers()?;
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), KalmaError> {
        if self.gateway.port == 0 {
            return Err(KalmaError::Config("gateway.port must be > 0".into()));
        }
        if self.gateway.port < 1024 {
            warn!(
                "gateway.port {} is a privileged port (< 1024), may require elevated permissions",
                self.gateway.port
            );
        }
        if !self.gateway.public_url.is_empty() {
            check_url("gateway.publicUrl", &self.gateway.public_url)?;
        }
        Ok(())
    }

    fn validate_oauth(&self) -> Result<(), KalmaError> {
        check_url("oauth.successRedirect", &self.oauth.success_redirect)?;
        check_url("oauth.errorRedirect", &self.oauth.error_redirect)?;
        Ok(())
    }

    fn validate_webhook(&self) -> Result<(), KalmaError> {
        if self.webhook.max_body_bytes == 0 {
            return Err(KalmaError::Config(
                "webhook.maxBodyBytes must be > 0".into(),
            ));
        }
        if self.webhook.max_body_bytes > 16 * 1_048_576 {
            warn!("webhook.maxBodyBytes is very large (> 16 MB)");
        }
        Ok(())
    }

    fn validate_store(&self) -> Result<(), KalmaError> {
        match self.store.backend.as_str() {
            "memory" => Ok(()),
            "sqlite" if self.store.path.is_empty() => Err(KalmaError::Config(
                "store.path is required for the sqlite backend".into(),
            )),
            "sqlite" => Ok(()),
            other => Err(KalmaError::Config(format!(
                "store.backend must be \"sqlite\" or \"memory\", got \"{other}\""
            ))),
        }
    }

    fn validate_providers(&self) -> Result<(), KalmaError> {
        let gmail = &self.providers.gmail;
        check_url("providers.gmail.authUrl", &gmail.auth_url)?;
        check_url("providers.gmail.tokenUrl", &gmail.token_url)?;
        check_url("providers.gmail.apiBase", &gmail.api_base)?;
        if gmail.scopes.is_empty() {
            return Err(KalmaError::Config(
                "providers.gmail.scopes must not be empty".into(),
            ));
        }

        let ig = &self.providers.instagram;
        check_url("providers.instagram.authUrl", &ig.auth_url)?;
        check_url("providers.instagram.tokenUrl", &ig.token_url)?;
        check_url("providers.instagram.graphBase", &ig.graph_base)?;

        if !self.whatsapp.automation_webhook_url.is_empty() {
            check_url(
                "whatsapp.automationWebhookUrl",
                &self.whatsapp.automation_webhook_url,
            )?;
        }
        Ok(())
    }
}

fn check_url(field: &str, value: &str) -> Result<(), KalmaError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| KalmaError::Config(format!("{field} is not a valid URL: {e}")))?;
    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(KalmaError::Config(format!(
            "{field} must use http or https"
        )));
    }
    Ok(())
}
