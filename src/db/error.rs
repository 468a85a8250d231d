//! Error type shared by every store operation.

use thiserror::Error;

/// Errors surfaced by the clinic store.
///
/// The first four variants are the domain taxonomy callers are expected to
/// handle; the rest wrap storage and serialization failures, which are
/// propagated as-is and never retried.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing required field, malformed record or uniqueness violation
    #[error("Validation error: {0}")]
    Validation(String),

    /// The operation targets a record that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Scheduling overlap, exhausted or expired prescription refill
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Bad credentials, inactive account, unknown or expired session
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    /// True when the underlying SQLite error is a UNIQUE constraint failure
    pub fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db_err) => {
                db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}
