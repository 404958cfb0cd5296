//! Error types for journal storage.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading or writing a journal.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to truncate beyond the end of the journal.
    #[error("cannot truncate journal to {requested} bytes, current size is {size}")]
    TruncatePastEnd {
        /// The requested size.
        requested: u64,
        /// The current journal size.
        size: u64,
    },

    /// The write was rejected by the backend.
    #[error("write rejected: {0}")]
    WriteRejected(String),
}
