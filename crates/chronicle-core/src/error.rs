//! Error types for the chronicle enrichment pipeline.

use thiserror::Error;

/// Result type alias using chronicle's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for chronicle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Retryable failure talking to the external knowledge base
    /// (rate limit, timeout, connection reset, 5xx).
    #[error("Transient external error: {0}")]
    TransientExternal(String),

    /// Non-retryable failure from the external knowledge base
    /// (malformed query, 4xx other than 429).
    #[error("External error: {0}")]
    PermanentExternal(String),

    /// Candidate vanished from the graph or lacks required fields.
    #[error("Not found locally: {0}")]
    LocalNotFound(String),

    /// Read or write against the graph store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Operator requested a stop.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An operator call that requires an idle controller arrived mid-run.
    #[error("Run in progress: {0}")]
    RunActive(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransientExternal(_) | Error::StoreUnavailable(_) | Error::Database(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            Error::TransientExternal(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}
