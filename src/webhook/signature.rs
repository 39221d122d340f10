use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::errors::{KalmaError, KalmaResult};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

pub const SHA256_HEADER: &str = "x-hub-signature-256";
pub const SHA1_HEADER: &str = "x-hub-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    Sha1,
    Sha256,
}

impl SignatureScheme {
    fn prefix(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1=",
            Self::Sha256 => "sha256=",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            Self::Sha1 => SHA1_HEADER,
            Self::Sha256 => SHA256_HEADER,
        }
    }
}

fn hmac_hex(scheme: SignatureScheme, secret: &str, body: &[u8]) -> Option<String> {
    let digest = match scheme {
        SignatureScheme::Sha1 => {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureScheme::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Some(hex::encode(digest))
}

/// Header value a platform would send for `body`, e.g. `sha1=5d41...`.
pub fn sign(scheme: SignatureScheme, secret: &str, body: &[u8]) -> Option<String> {
    hmac_hex(scheme, secret, body).map(|hex| format!("{}{}", scheme.prefix(), hex))
}

/// Check a `sha1=<hex>` / `sha256=<hex>` header value against the raw body.
pub fn verify(scheme: SignatureScheme, secret: &str, header_value: &str, body: &[u8]) -> bool {
    let Some(given) = header_value.trim().strip_prefix(scheme.prefix()) else {
        return false;
    };
    let Some(expected) = hmac_hex(scheme, secret, body) else {
        return false;
    };
    let given = given.to_ascii_lowercase();
    expected.as_bytes().ct_eq(given.as_bytes()).into()
}

/// Authenticate a delivery from its headers.
///
/// `X-Hub-Signature-256` is checked when present, otherwise `X-Hub-Signature`.
/// A present-but-wrong SHA-256 header is not retried against SHA-1.
pub fn authenticate(app_secret: &str, headers: &HeaderMap, body: &[u8]) -> KalmaResult<SignatureScheme> {
    if app_secret.is_empty() {
        return Err(KalmaError::ConfigMissing("webhook.appSecret".into()));
    }
    let scheme = if headers.contains_key(SHA256_HEADER) {
        SignatureScheme::Sha256
    } else if headers.contains_key(SHA1_HEADER) {
        SignatureScheme::Sha1
    } else {
        warn!("webhook delivery without signature header rejected");
        return Err(KalmaError::SignatureInvalid);
    };
    let value = headers
        .get(scheme.header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify(scheme, app_secret, value, body) {
        warn!("webhook delivery with invalid {} signature rejected", scheme.header());
        return Err(KalmaError::SignatureInvalid);
    }
    Ok(scheme)
}
