use anyhow::{Result, bail};
use reqwest::{Client, Response};
use std::time::Duration;

use crate::errors::KalmaError;

/// Provider error bodies are kept for diagnostics up to this size (64 KB).
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Build a `reqwest::Client` with standard timeouts (10 s connect, 30 s overall).
///
/// Falls back to the default client if the builder fails.
pub fn default_http_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Download a response body as bytes with a size limit.
///
/// Returns `(bytes, was_truncated)`.
pub async fn limited_body(resp: Response, max_bytes: usize) -> Result<(Vec<u8>, bool)> {
    if let Some(cl) = resp.content_length()
        && cl as usize > max_bytes
    {
        bail!(
            "response body too large: Content-Length {} exceeds limit {}",
            cl,
            max_bytes
        );
    }

    let mut buf = Vec::new();
    let mut stream = resp;
    while let Some(chunk) = stream.chunk().await? {
        if buf.len() + chunk.len() > max_bytes {
            let remaining = max_bytes.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..remaining]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}

/// Download a response body as a UTF-8 string with a size limit.
pub async fn limited_text(resp: Response, max_bytes: usize) -> Result<String> {
    let (bytes, truncated) = limited_body(resp, max_bytes).await?;
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    if truncated {
        text.push_str("\n[truncated]");
    }
    Ok(text)
}

/// Turn a non-2xx provider response into `KalmaError::Upstream`.
pub async fn upstream_error(platform: &str, resp: Response) -> KalmaError {
    let status = resp.status().as_u16();
    let body = limited_text(resp, MAX_ERROR_BODY_BYTES)
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    KalmaError::Upstream {
        platform: platform.to_string(),
        status,
        body,
    }
}

/// Best human-readable message out of an OAuth / Graph API error body.
///
/// Understands `{"error_description": ..}`, `{"error": {"message": ..}}`,
/// `{"error_message": ..}` and `{"error": ".."}`; falls back to the raw body.
pub fn provider_error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };
    let candidates = [
        json.get("error_description"),
        json.get("error").and_then(|e| e.get("message")),
        json.get("error_message"),
        json.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
