//! Scheduler error types.

use thiserror::Error;

/// Command scheduling and execution errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("command '{name}' failed: {message}")]
    CommandFailed { name: String, message: String },

    #[error("invalid command arguments: {0}")]
    InvalidArgs(String),

    #[error("queue storage error: {0}")]
    Db(#[from] satchel_db::DbError),
}

impl SchedulerError {
    /// Wrap an arbitrary command failure.
    pub fn command_failed(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::CommandFailed {
            name: name.into(),
            message: error.to_string(),
        }
    }
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
