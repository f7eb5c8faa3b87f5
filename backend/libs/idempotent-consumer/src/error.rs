//! Error types for the idempotent event store

use thiserror::Error;

/// Result type for dedup store operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Errors that can occur while reading or writing the dedup ledger
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Database operation failed (connection, query execution, etc.)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed at startup
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Stored payload could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data directory could not be prepared
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl IdempotencyError {
    /// Check if error is transient (the store may recover on its own)
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            IdempotencyError::Other(err) => err
                .downcast_ref::<sqlx::Error>()
                .map(|e| matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed))
                .unwrap_or(false),
            _ => false,
        }
    }
}
