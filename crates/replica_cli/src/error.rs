//! CLI error type.

use replica_core::CoreError;
use replica_sync::SyncError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No `--path` was given.
    #[error("replica path required (use --path <dir>)")]
    MissingPath,

    /// The path holds no replica.
    #[error("no replica found at {}", .0.display())]
    NoReplica(PathBuf),

    /// Opening or reading the replica failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Reading or writing cursors failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
