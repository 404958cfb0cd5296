//! Replica directory management.
//!
//! A persistent replica lives in one directory:
//!
//! ```text
//! <replica_path>/
//! ├─ LOCK           # Advisory lock for single-process access
//! ├─ journal.log    # Local store journal
//! └─ cursors.cbor   # Last successful sync time per collection
//! ```

use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::store::{JournalLocalStore, JournalOptions};
use fs2::FileExt;
use replica_storage::FileJournal;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const CURSOR_FILE: &str = "cursors.cbor";

/// An exclusively locked replica directory.
///
/// The lock is held until the `ReplicaDir` is dropped. Keep it alive for
/// as long as stores opened from it are in use.
///
/// # Example
///
/// ```rust,ignore
/// let dir = ReplicaDir::open(Path::new("notes.replica"), true)?;
/// let store: JournalLocalStore<Note, _> = dir.open_store(JournalOptions::default())?;
/// ```
#[derive(Debug)]
pub struct ReplicaDir {
    path: PathBuf,
    _lock_file: File,
}

impl ReplicaDir {
    /// Opens or creates a replica directory and locks it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (returns `ReplicaLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if !create_if_missing {
                return Err(CoreError::invalid_path(format!(
                    "replica directory does not exist: {}",
                    path.display()
                )));
            }
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_path(format!(
                "not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::ReplicaLocked);
        }

        tracing::debug!(path = %path.display(), "replica directory locked");
        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the replica directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the local store journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the path of the persisted sync cursors.
    #[must_use]
    pub fn cursor_path(&self) -> PathBuf {
        self.path.join(CURSOR_FILE)
    }

    /// Opens the journal file, creating it if needed.
    pub fn open_journal(&self) -> CoreResult<FileJournal> {
        Ok(FileJournal::open(&self.journal_path())?)
    }

    /// Opens the local store persisted in this directory.
    pub fn open_store<R: Record>(
        &self,
        options: JournalOptions,
    ) -> CoreResult<JournalLocalStore<R, FileJournal>> {
        JournalLocalStore::open(self.open_journal()?, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{item, Item};
    use crate::record::SyncRecord;
    use crate::store::LocalStore;
    use crate::types::Timestamp;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_directory() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("replica");
        let dir = ReplicaDir::open(&path, true).unwrap();
        assert!(path.join(LOCK_FILE).exists());
        assert_eq!(dir.journal_path(), path.join("journal.log"));
        assert_eq!(dir.cursor_path(), path.join("cursors.cbor"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let tmp = tempdir().unwrap();
        let result = ReplicaDir::open(&tmp.path().join("nope"), false);
        assert!(matches!(result, Err(CoreError::InvalidPath { .. })));
    }

    #[test]
    fn file_is_not_a_replica() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("file");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ReplicaDir::open(&file, true),
            Err(CoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn second_open_is_locked_out() {
        let tmp = tempdir().unwrap();
        let first = ReplicaDir::open(tmp.path(), true).unwrap();
        assert!(matches!(
            ReplicaDir::open(tmp.path(), true),
            Err(CoreError::ReplicaLocked)
        ));
        drop(first);
        assert!(ReplicaDir::open(tmp.path(), true).is_ok());
    }

    #[test]
    fn store_persists_in_directory() {
        let tmp = tempdir().unwrap();
        {
            let dir = ReplicaDir::open(tmp.path(), true).unwrap();
            let store = dir.open_store::<Item>(JournalOptions::default()).unwrap();
            store
                .upsert(SyncRecord::dirty("S1", item("S1", "a"), Timestamp(1)))
                .unwrap();
        }
        let dir = ReplicaDir::open(tmp.path(), false).unwrap();
        let store = dir.open_store::<Item>(JournalOptions::default()).unwrap();
        assert_eq!(store.len().unwrap(), 1);
    }
}
