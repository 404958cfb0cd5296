//! Conflict resolution policies.
//!
//! A conflict occurs when a record is dirty locally and the remote copy
//! changed too. A [`ConflictResolver`] merges both sides into one clean
//! record. Resolvers must be deterministic: the resolution time is passed
//! in rather than read from a clock.

use replica_core::{Record, SyncRecord, Timestamp};

/// Merges a locally modified record with its remote copy.
pub trait ConflictResolver<R: Record>: Send + Sync {
    /// Returns the settled record.
    ///
    /// The result must be keyed by the remote record's id; the engine
    /// re-keys results that are not. A dirty result holds changes the
    /// remote copy lacks and is pushed in the same cycle. Resolvers run
    /// while the local store is locked and must not access it.
    fn resolve(&self, local: &SyncRecord<R>, remote: &R, resolved_at: Timestamp) -> SyncRecord<R>;
}

impl<R, F> ConflictResolver<R> for F
where
    R: Record,
    F: Fn(&SyncRecord<R>, &R, Timestamp) -> SyncRecord<R> + Send + Sync,
{
    fn resolve(&self, local: &SyncRecord<R>, remote: &R, resolved_at: Timestamp) -> SyncRecord<R> {
        self(local, remote, resolved_at)
    }
}

/// Discards local edits in favor of the remote copy. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteWins;

impl<R: Record> ConflictResolver<R> for RemoteWins {
    fn resolve(&self, local: &SyncRecord<R>, remote: &R, resolved_at: Timestamp) -> SyncRecord<R> {
        let id = remote_id(local, remote);
        SyncRecord::clean(id, remote.clone(), resolved_at)
    }
}

/// Keeps whichever side was modified last.
///
/// The local side's time is its last local mutation; the remote side's is
/// [`Record::updated_at`]. Ties and remote records without a time go to
/// the remote copy. When the local payload wins it comes back dirty,
/// with the remote id and modification time, so the engine pushes it and
/// the push is not rejected as stale.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl<R: Record> ConflictResolver<R> for LastWriterWins {
    fn resolve(&self, local: &SyncRecord<R>, remote: &R, resolved_at: Timestamp) -> SyncRecord<R> {
        let id = remote_id(local, remote);
        match remote.updated_at() {
            Some(remote_at) if local.local_updated_at > remote_at => {
                let mut payload = local.payload.clone();
                payload.set_id(Some(id.clone()));
                payload.set_updated_at(remote_at);
                SyncRecord::dirty(id, payload, resolved_at)
            }
            _ => SyncRecord::clean(id, remote.clone(), resolved_at),
        }
    }
}

fn remote_id<R: Record>(local: &SyncRecord<R>, remote: &R) -> String {
    remote
        .id()
        .filter(|id| !id.is_empty())
        .unwrap_or(&local.id)
        .to_string()
}
