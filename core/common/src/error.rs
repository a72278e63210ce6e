//! Common error types for vault synchronization.

use thiserror::Error;

/// Top-level error type for sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection refused, reset or timed out.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered with a non-success HTTP status.
    #[error("HTTP {status} {reason}")]
    Http { status: u16, reason: String },

    /// Configuration value missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another sync cycle holds the vault.
    #[error("Locked: {0}")]
    Locked(String),

    /// Background scheduler is not running.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
