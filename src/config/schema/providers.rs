use serde::{Deserialize, Serialize};

fn default_gmail_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/gmail.modify".to_string(),
        "https://www.googleapis.com/auth/gmail.send".to_string(),
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
    ]
}

fn default_gmail_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}

fn default_gmail_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default, rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "clientSecret")]
    pub client_secret: String,
    #[serde(default, rename = "redirectUri")]
    pub redirect_uri: String,
    #[serde(default = "default_gmail_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_gmail_auth_url", rename = "authUrl")]
    pub auth_url: String,
    #[serde(default = "default_gmail_token_url", rename = "tokenUrl")]
    pub token_url: String,
    #[serde(default = "default_gmail_api_base", rename = "apiBase")]
    pub api_base: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scopes: default_gmail_scopes(),
            auth_url: default_gmail_auth_url(),
            token_url: default_gmail_token_url(),
            api_base: default_gmail_api_base(),
        }
    }
}

redact_debug!(
    GmailConfig,
    client_id,
    redact(client_secret),
    redirect_uri,
    scopes,
    auth_url,
    token_url,
    api_base,
);

fn default_instagram_scopes() -> Vec<String> {
    vec![
        "instagram_business_basic".to_string(),
        "instagram_business_manage_messages".to_string(),
        "instagram_business_manage_comments".to_string(),
    ]
}

fn default_instagram_auth_url() -> String {
    "https://www.instagram.com/oauth/authorize".to_string()
}

fn default_instagram_token_url() -> String {
    "https://api.instagram.com/oauth/access_token".to_string()
}

fn default_instagram_graph_base() -> String {
    "https://graph.instagram.com".to_string()
}

fn default_instagram_api_version() -> String {
    "v21.0".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct InstagramConfig {
    /// Instagram app id.
    #[serde(default, rename = "clientId")]
    pub client_id: String,
    #[serde(default, rename = "clientSecret")]
    pub client_secret: String,
    #[serde(default, rename = "redirectUri")]
    pub redirect_uri: String,
    #[serde(default = "default_instagram_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_instagram_auth_url", rename = "authUrl")]
    pub auth_url: String,
    #[serde(default = "default_instagram_token_url", rename = "tokenUrl")]
    pub token_url: String,
    #[serde(default = "default_instagram_graph_base", rename = "graphBase")]
    pub graph_base: String,
    #[serde(default = "default_instagram_api_version", rename = "apiVersion")]
    pub api_version: String,
}

impl Default for InstagramConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: String::new(),
            scopes: default_instagram_scopes(),
            auth_url: default_instagram_auth_url(),
            token_url: default_instagram_token_url(),
            graph_base: default_instagram_graph_base(),
            api_version: default_instagram_api_version(),
        }
    }
}

redact_debug!(
    InstagramConfig,
    client_id,
    redact(client_secret),
    redirect_uri,
    scopes,
    auth_url,
    token_url,
    graph_base,
    api_version,
);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub instagram: InstagramConfig,
}

/// WhatsApp is reached through an external automation tool (Make, n8n, Zapier)
/// that owns the Business API session; we only POST to its webhook.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct WhatsAppConfig {
    #[serde(default, rename = "automationWebhookUrl")]
    pub automation_webhook_url: String,
    /// Optional bearer key the automation endpoint expects.
    #[serde(default, rename = "apiKey")]
    pub api_key: String,
}

redact_debug!(
    WhatsAppConfig,
    automation_webhook_url,
    redact(api_key),
);
