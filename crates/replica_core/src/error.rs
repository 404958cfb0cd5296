//! Error types for Replica core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the local replica.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Journal backend error.
    #[error("storage error: {0}")]
    Storage(#[from] replica_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or journal entry could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// The record violates a store invariant.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the violation.
        message: String,
    },

    /// A journal frame passed its checksum but could not be replayed.
    #[error("corrupt journal at offset {offset}: {message}")]
    CorruptJournal {
        /// Offset of the offending frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the replica directory.
    #[error("replica locked: another process has exclusive access")]
    ReplicaLocked,

    /// The replica directory is missing or is not a directory.
    #[error("invalid replica path: {message}")]
    InvalidPath {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec {
            message: message.to_string(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath {
            message: message.into(),
        }
    }
}
