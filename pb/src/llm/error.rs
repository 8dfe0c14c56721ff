//! Model client errors

use std::time::Duration;
use thiserror::Error;

/// Failure of a model request
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{0} is not set; export it or add it to .env")]
    MissingApiKey(String),

    #[error("Unsupported LLM provider '{0}' (supported: openai)")]
    UnsupportedProvider(String),

    #[error("Rate limited by the model API, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("No response from the model API within {0:?}")]
    Timeout(Duration),

    #[error("Model refused the request: {0}")]
    Refused(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether sending the same request again may succeed
    ///
    /// Rate limits are not retried: the wait they ask for exceeds what a
    /// chat turn should block on.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Api { status, .. } => *status == 408 || *status >= 500,
            LlmError::Network(_) | LlmError::Timeout(_) => true,
            _ => false,
        }
    }
}
