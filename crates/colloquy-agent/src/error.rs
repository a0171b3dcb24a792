//! Error types for colloquy-agent

use colloquy_ai::Provider;
use thiserror::Error;

/// Result type alias using colloquy-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a conversation
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the provider layer
    #[error(transparent)]
    Ai(#[from] colloquy_ai::Error),

    /// A summarization pass failed (string-based for flexibility)
    #[error("Compaction error: {0}")]
    Compaction(String),

    /// No transport is configured for the selected provider
    #[error("No transport configured for {0}")]
    NoTransport(Provider),
}

impl Error {
    /// Whether the error came from the caller aborting the request
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Ai(colloquy_ai::Error::Aborted))
    }
}
