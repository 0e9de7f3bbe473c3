//! Provider error types.

use thiserror::Error;

/// Result type alias for compute provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors returned by the compute provider API.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn api(code: &str, message: &str) -> Self {
        Self::Api {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}
