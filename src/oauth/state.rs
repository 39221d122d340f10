//! The opaque `state` parameter round-tripped through the provider.
//!
//! Encoded as URL-safe base64 (no padding) of a small JSON object. Decoding
//! also accepts standard/padded base64 since older web clients built state
//! with `btoa(JSON.stringify(..))`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::errors::{KalmaError, KalmaResult};
use crate::models::{Platform, is_single_segment};

/// Longest state string we attempt to decode.
const MAX_STATE_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthState {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
}

impl OAuthState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            platform: None,
            nonce: None,
            issued_at: None,
        }
    }

    /// State for a freshly started flow: bound to a platform, random nonce, timestamp.
    pub fn for_flow(user_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            user_id: user_id.into(),
            platform: Some(platform),
            nonce: Some(uuid::Uuid::new_v4().simple().to_string()),
            issued_at: Some(chrono::Utc::now().timestamp()),
        }
    }
}

pub fn encode(state: &OAuthState) -> String {
    // Serializing a struct of strings and integers cannot fail
    let json = serde_json::to_vec(state).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode(raw: &str) -> KalmaResult<OAuthState> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(KalmaError::InvalidState("state is empty".into()));
    }
    if raw.len() > MAX_STATE_LEN {
        return Err(KalmaError::InvalidState("state is too long".into()));
    }

    // Normalize standard alphabet and padding onto the URL-safe unpadded form
    let normalized: String = raw
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    let bytes = URL_SAFE_NO_PAD
        .decode(normalized.as_bytes())
        .map_err(|e| KalmaError::InvalidState(format!("state is not valid base64: {e}")))?;

    let state: OAuthState = serde_json::from_slice(&bytes)
        .map_err(|e| KalmaError::InvalidState(format!("state is not valid JSON: {e}")))?;

    if state.user_id.trim().is_empty() {
        return Err(KalmaError::InvalidState("state has no userId".into()));
    }
    if !is_single_segment(&state.user_id) {
        return Err(KalmaError::InvalidState(
            "state userId is not a valid id".into(),
        ));
    }
    Ok(state)
}
