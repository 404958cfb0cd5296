//! Error types for the sync engine.

use crate::outcome::RecordFailure;
use crate::remote::RemoteError;
use replica_core::CoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a sync cycle or an engine call.
///
/// Per-record push failures are not errors; they are reported in
/// [`SyncOutcome::failures`](crate::SyncOutcome::failures) unless the engine
/// is configured to fail fast.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store failed.
    #[error("local storage error: {0}")]
    LocalStorage(#[from] CoreError),

    /// A remote call failed in a way that aborts the cycle.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// A record failed to push and the engine is configured to fail fast.
    #[error("record '{}' failed: {}", .0.id, .0.message)]
    RecordFailed(RecordFailure),

    /// The cycle was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Another cycle is in flight for the collection.
    #[error("sync already running for collection '{collection}'")]
    AlreadyRunning {
        /// Collection name.
        collection: String,
    },

    /// The cursor could not be read or written.
    #[error("cursor error: {message}")]
    Cursor {
        /// Error message.
        message: String,
    },
}

impl SyncError {
    /// Creates a cursor error.
    pub fn cursor(message: impl ToString) -> Self {
        Self::Cursor {
            message: message.to_string(),
        }
    }

    /// Returns true if running the cycle again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Remote(err) => err.is_retryable(),
            _ => false,
        }
    }
}
