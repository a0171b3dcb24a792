//! Error types for colloquy-ai

use thiserror::Error;

/// Result type alias using colloquy-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat provider
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned a non-2xx response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Token acquisition failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Stream was aborted by the caller
    #[error("Request aborted")]
    Aborted,

    /// Connection-level failure while streaming
    #[error("SSE error: {0}")]
    Sse(String),

    /// Response decoded but did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Provider only supports blocking completions
    #[error("Streaming not supported by {0}")]
    StreamingUnsupported(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and response body
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if the provider rejected our credentials
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::Auth(_) => true,
            Error::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Check if this error was caused by a connection problem rather than
    /// a well-formed rejection from the provider
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Error::Sse(_) => true,
            _ => false,
        }
    }
}
