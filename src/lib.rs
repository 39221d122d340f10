#![warn(clippy::pedantic)]
// Noisy doc/signature lints; would require annotating every pub function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference; keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Timestamps and body sizes move between i64/u64/usize
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::too_many_lines)]
// gmail::GmailProvider, send::GmailSender and friends
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod models;
pub mod oauth;
pub mod send;
pub mod store;
pub(crate) mod utils;
pub mod webhook;

pub use errors::{KalmaError, KalmaResult};

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    use crate::webhook::signature::{SignatureScheme, verify};

    /// Run both signature schemes over untrusted header/body input.
    pub fn verify_webhook_signature(secret: &str, header_value: &str, body: &[u8]) -> bool {
        verify(SignatureScheme::Sha1, secret, header_value, body)
            | verify(SignatureScheme::Sha256, secret, header_value, body)
    }

    /// Decode an untrusted OAuth state value.
    pub fn decode_oauth_state(raw: &str) -> bool {
        crate::oauth::state::decode(raw).is_ok()
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
