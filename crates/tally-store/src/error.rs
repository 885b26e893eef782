//! Error types for the metric repository.

use thiserror::Error;

/// Result type alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in repository operations.
///
/// Snapshot file failures never surface here during normal operation; they
/// are logged and the in-memory state stays authoritative.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
