//! Inspect command implementation.

use super::{open_replica, open_store};
use crate::error::CliResult;
use crate::record::JsonRecord;
use crate::Format;
use replica_core::{is_client_id, LocalStore, SyncRecord};
use replica_sync::FileSyncCursor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Replica inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Replica path.
    pub path: String,
    /// Record counts.
    pub records: RecordCounts,
    /// Number of journal frames.
    pub journal_frames: u64,
    /// Journal file size in bytes.
    pub journal_size: u64,
    /// Stored cursors, in milliseconds since the epoch.
    pub cursors: BTreeMap<String, u64>,
}

/// Record counts of a replica.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct RecordCounts {
    /// All stored records, tombstones included.
    pub total: usize,
    /// Records waiting to be pushed.
    pub dirty: usize,
    /// Records marked for remote deletion.
    pub tombstones: usize,
    /// Records that never reached the server.
    pub client_keyed: usize,
}

impl RecordCounts {
    fn tally(records: &[SyncRecord<JsonRecord>]) -> Self {
        records.iter().fold(Self::default(), |mut counts, record| {
            counts.total += 1;
            counts.dirty += usize::from(record.dirty);
            counts.tombstones += usize::from(record.deleted);
            counts.client_keyed += usize::from(is_client_id(&record.id));
            counts
        })
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let result = inspect(path)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }

    Ok(())
}

/// Collects statistics about the replica at `path`.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let dir = open_replica(path)?;
    let store = open_store(&dir)?;
    let records = store.scan(&|_| true)?;
    let cursors = FileSyncCursor::open(&dir.cursor_path())?
        .all()
        .into_iter()
        .map(|(collection, at)| (collection, at.as_millis()))
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        records: RecordCounts::tally(&records),
        journal_frames: store.frame_count(),
        journal_size: store.journal_size()?,
        cursors,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Replica: {}", result.path);
    println!();
    println!("Records:");
    println!("  Total:        {}", result.records.total);
    println!("  Dirty:        {}", result.records.dirty);
    println!("  Tombstones:   {}", result.records.tombstones);
    println!("  Client-keyed: {}", result.records.client_keyed);
    println!();
    println!("Journal:");
    println!("  Frames: {}", result.journal_frames);
    println!("  Size:   {} bytes", result.journal_size);
    println!();
    if result.cursors.is_empty() {
        println!("Cursors: none");
    } else {
        println!("Cursors:");
        for (collection, at) in &result.cursors {
            println!("  {collection}: {at}ms");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{JournalOptions, ReplicaDir, Timestamp};
    use replica_sync::SyncCursor;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn counts_records_and_cursors() {
        let temp = tempdir().unwrap();
        {
            let dir = ReplicaDir::open(temp.path(), true).unwrap();
            let store = dir
                .open_store::<JsonRecord>(JournalOptions::default())
                .unwrap();
            let at = Timestamp(1);
            store
                .upsert(SyncRecord::clean("S1", JsonRecord(json!({"id": "S1"})), at))
                .unwrap();
            store
                .upsert(SyncRecord::dirty("S2", JsonRecord(json!({"id": "S2"})), at).tombstone(at))
                .unwrap();
            store
                .upsert(SyncRecord::dirty(
                    "local_abc",
                    JsonRecord(json!({"id": "local_abc"})),
                    at,
                ))
                .unwrap();
            FileSyncCursor::open(&dir.cursor_path())
                .unwrap()
                .set("notes", Timestamp(99))
                .unwrap();
        }

        let result = inspect(temp.path()).unwrap();
        assert_eq!(
            result.records,
            RecordCounts {
                total: 3,
                dirty: 2,
                tombstones: 1,
                client_keyed: 1,
            }
        );
        assert_eq!(result.journal_frames, 3);
        assert!(result.journal_size > 0);
        assert_eq!(result.cursors.get("notes"), Some(&99));
    }

    #[test]
    fn missing_replica_is_reported() {
        let temp = tempdir().unwrap();
        let missing = temp.path().join("nope");
        assert!(matches!(
            inspect(&missing),
            Err(crate::error::CliError::NoReplica(p)) if p == missing
        ));
    }
}
