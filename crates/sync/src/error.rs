//! Synchronization and resolution error taxonomy.
//!
//! Transport- and storage-level failures are translated into these kinds at
//! the command/authority boundary; lower layers never swallow errors.

use thiserror::Error;

/// Errors surfaced by content authorities and the resolver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transient transport failure; retried with a bounded attempt count
    /// before becoming permanent.
    #[error("network error: {0}")]
    Network(String),

    /// Invalid or missing credentials; the authority stays logged out.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Local store failure; the refresh step is rolled back and previous
    /// cache state preserved.
    #[error("storage error: {0}")]
    Storage(#[from] satchel_db::DbError),

    /// Missing or invalid fileset/type mapping; fails at construction.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no content authority named '{0}'")]
    AuthorityNotFound(String),

    #[error("no path root '{root}' on authority '{authority}'")]
    PathNotFound { authority: String, root: String },

    #[error("invalid content path: {0}")]
    InvalidPath(String),

    #[error("no converter for content type '{0}'")]
    UnsupportedContentType(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request cancelled")]
    Cancelled,

    #[error("scheduler error: {0}")]
    Scheduler(#[from] satchel_scheduler::SchedulerError),
}

impl From<satchel_core::Error> for SyncError {
    fn from(e: satchel_core::Error) -> Self {
        match e {
            satchel_core::Error::InvalidPath(m) | satchel_core::Error::InvalidAddress(m) => {
                SyncError::InvalidPath(m)
            }
            satchel_core::Error::Config(m) => SyncError::Config(m),
        }
    }
}

/// Result type for synchronization operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;
