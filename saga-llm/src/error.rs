//! Errors raised by model clients and prompt handling.

use thiserror::Error;

/// Failure of a model call or of its prompt/response handling.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed before a response arrived.
    #[error("model request failed: {0}")]
    RequestFailed(String),

    /// The backend answered with a non-success status.
    #[error("model backend returned HTTP {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The reply could not be parsed as JSON.
    #[error("model output is not valid JSON: {0}")]
    ParseError(String),

    /// The reply parsed but lacked required fields.
    #[error("model output does not match the expected shape: {0}")]
    SchemaValidation(String),

    /// Request timed out.
    #[error("model request timed out after {0}ms")]
    Timeout(u64),

    /// No backend could be reached or none is configured.
    #[error("model backend unavailable: {0}")]
    Unavailable(String),

    /// Retries ran out.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final failure.
        last_error: String,
    },

    /// Bad provider name, missing key or unreadable prompt file.
    #[error("model configuration error: {0}")]
    ConfigError(String),
}

impl LlmError {
    /// Whether repeating the same request could plausibly succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Unavailable(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(0)
        } else if err.is_connect() {
            Self::Unavailable(err.to_string())
        } else {
            Self::RequestFailed(err.to_string())
        }
    }
}
