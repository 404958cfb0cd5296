//! CLI command implementations.

pub mod compact;
pub mod cursor;
pub mod inspect;

use crate::error::{CliError, CliResult};
use crate::record::JsonRecord;
use replica_core::{JournalLocalStore, JournalOptions, ReplicaDir};
use replica_storage::FileJournal;
use std::path::Path;

/// Opens an existing replica directory, taking its lock.
pub(crate) fn open_replica(path: &Path) -> CliResult<ReplicaDir> {
    if !path.is_dir() {
        return Err(CliError::NoReplica(path.to_path_buf()));
    }
    Ok(ReplicaDir::open(path, false)?)
}

/// Opens the replica's record store without knowing its record type.
pub(crate) fn open_store(
    dir: &ReplicaDir,
) -> CliResult<JournalLocalStore<JsonRecord, FileJournal>> {
    // Maintenance never triggers compaction on its own.
    let options = JournalOptions::default().with_compact_ratio(0);
    Ok(dir.open_store(options)?)
}
