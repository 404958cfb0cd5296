//! Results of a sync cycle.

use crate::remote::{RemoteError, RemoteErrorKind};
use replica_core::Timestamp;
use std::time::Duration;

/// A record whose push did not succeed.
///
/// The record stays dirty and is retried on the next cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Local id of the record.
    pub id: String,
    /// Failure class.
    pub kind: RemoteErrorKind,
    /// Failure detail.
    pub message: String,
}

impl RecordFailure {
    pub(crate) fn new(id: impl Into<String>, error: &RemoteError) -> Self {
        Self {
            id: id.into(),
            kind: error.kind,
            message: error.message.clone(),
        }
    }
}

/// Result of pushing one dirty record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    /// The record was created or updated remotely.
    Pushed {
        /// Local id before the push.
        id: String,
        /// Id under which the record is now stored.
        server_id: String,
    },
    /// The tombstone was deleted remotely and purged locally.
    Deleted {
        /// Id of the purged record.
        id: String,
    },
    /// The push failed; the record stays dirty.
    Failed(RecordFailure),
}

/// Aggregate result of one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Remote records applied locally.
    pub pulled: usize,
    /// Conflicts settled by the resolver, on pull or on push.
    pub conflicts_resolved: usize,
    /// Records created or updated remotely.
    pub pushed: usize,
    /// Tombstones deleted remotely.
    pub deleted: usize,
    /// Records whose push failed.
    pub failures: Vec<RecordFailure>,
    /// Cursor stored at the end of the cycle.
    pub cursor: Timestamp,
    /// Wall time of the cycle.
    pub duration: Duration,
}

impl SyncOutcome {
    /// Number of records synchronized successfully.
    pub fn succeeded(&self) -> usize {
        self.pulled + self.pushed + self.deleted
    }

    /// Returns true if no record failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, result: RecordResult) {
        match result {
            RecordResult::Pushed { .. } => self.pushed += 1,
            RecordResult::Deleted { .. } => self.deleted += 1,
            RecordResult::Failed(failure) => self.failures.push(failure),
        }
    }
}
