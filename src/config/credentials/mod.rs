use super::schema::Config;

macro_rules! define_credentials {
    ($( $name:literal, $env:literal => $($path:ident).+ );* $(;)?) => {
        /// All known credential slot names.
        pub const CREDENTIAL_NAMES: &[&str] = &[$($name),*];

        /// (slot name, env var name) pairs.
        pub const CREDENTIAL_ENV_VARS: &[(&str, &str)] = &[$(($name, $env)),*];

        /// Get the current value of a credential field by slot name.
        pub fn get_credential_value<'a>(config: &'a Config, name: &str) -> Option<&'a str> {
            match name {
                $($name => Some(config.$($path).+.as_str()),)*
                _ => None,
            }
        }

        /// Apply environment variable overrides.
        ///
        /// Any `KALMA_*` env var that is set and non-empty will overwrite the
        /// corresponding config field, allowing secrets to be injected without
        /// touching the config file (useful for containers and CI).
        pub fn apply_env_overrides(config: &mut Config) {
            apply_overrides_from(config, |key| std::env::var(key).ok());
        }

        fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
            $(
                if let Some(val) = lookup($env) {
                    if !val.is_empty() {
                        config.$($path).+ = val;
                    }
                }
            )*
        }
    };
}

define_credentials! {
    "gmail-client-id",          "KALMA_GMAIL_CLIENT_ID"          => providers.gmail.client_id;
    "gmail-client-secret",      "KALMA_GMAIL_CLIENT_SECRET"      => providers.gmail.client_secret;
    "instagram-client-id",      "KALMA_INSTAGRAM_CLIENT_ID"      => providers.instagram.client_id;
    "instagram-client-secret",  "KALMA_INSTAGRAM_CLIENT_SECRET"  => providers.instagram.client_secret;
    "webhook-verify-token",     "KALMA_WEBHOOK_VERIFY_TOKEN"     => webhook.verify_token;
    "webhook-app-secret",       "KALMA_WEBHOOK_APP_SECRET"       => webhook.app_secret;
    "whatsapp-webhook-url",     "KALMA_WHATSAPP_WEBHOOK_URL"     => whatsapp.automation_webhook_url;
    "whatsapp-api-key",         "KALMA_WHATSAPP_API_KEY"         => whatsapp.api_key;
}

/// Credential slots that are still empty after all overrides.
pub fn missing_credentials(config: &Config) -> Vec<&'static str> {
    CREDENTIAL_NAMES
        .iter()
        .copied()
        .filter(|name| get_credential_value(config, name).is_some_and(str::is_empty))
        .collect()
}
