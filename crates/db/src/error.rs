//! Record store error types.

use thiserror::Error;

/// Record store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid value template: {0}")]
    InvalidTemplate(String),

    #[error("unknown fileset category: {0}")]
    UnknownCategory(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for record store operations.
pub type DbResult<T> = std::result::Result<T, DbError>;
