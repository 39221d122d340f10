use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Typed error hierarchy for kalma.
///
/// Use at module boundaries (OAuth exchange, webhook ingestion, outbound sends, storage).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal` variant
/// allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum KalmaError {
    #[error("Configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Webhook signature invalid")]
    SignatureInvalid,

    #[error("Webhook verify token mismatch")]
    VerifyTokenMismatch,

    #[error("Payload too large: {size} bytes exceeds limit {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Token exchange failed for {platform}: {message}")]
    TokenExchange { platform: String, message: String },

    #[error("Upstream error from {platform} ({status}): {body}")]
    Upstream {
        platform: String,
        status: u16,
        body: String,
    },

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `KalmaError`.
pub type KalmaResult<T> = std::result::Result<T, KalmaError>;

impl KalmaError {
    /// HTTP status a handler answers with when this error reaches the boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ConfigMissing(_)
            | Self::Config(_)
            | Self::Persistence(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) | Self::InvalidState(_) | Self::UnsupportedPlatform(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::VerifyTokenMismatch => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::TokenExchange { .. } | Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Message safe to hand back to a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal error".to_string(),
            Self::Persistence(_) => "storage unavailable".to_string(),
            Self::TokenExchange { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl IntoResponse for KalmaError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }
        (
            status,
            Json(serde_json::json!({"error": self.public_message()})),
        )
            .into_response()
    }
}
