//! Per-collection sync cursors.
//!
//! A cursor is the start time of the last successful sync cycle of a
//! collection. It only moves forward.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use replica_core::Timestamp;
use replica_storage::write_atomic;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Durable storage for last-sync timestamps, one per collection.
pub trait SyncCursor: Send + Sync {
    /// Returns the cursor, or [`Timestamp::EPOCH`] if never set.
    fn get(&self, collection: &str) -> SyncResult<Timestamp>;

    /// Advances the cursor. Values older than the stored one are ignored.
    fn set(&self, collection: &str, at: Timestamp) -> SyncResult<()>;

    /// Forgets the cursor so the next cycle pulls everything.
    fn reset(&self, collection: &str) -> SyncResult<()>;
}

impl<T: SyncCursor + ?Sized> SyncCursor for std::sync::Arc<T> {
    fn get(&self, collection: &str) -> SyncResult<Timestamp> {
        (**self).get(collection)
    }

    fn set(&self, collection: &str, at: Timestamp) -> SyncResult<()> {
        (**self).set(collection, at)
    }

    fn reset(&self, collection: &str) -> SyncResult<()> {
        (**self).reset(collection)
    }
}

/// Cursors kept in memory only.
#[derive(Debug, Default)]
pub struct MemorySyncCursor {
    cursors: Mutex<BTreeMap<String, Timestamp>>,
}

impl MemorySyncCursor {
    /// Creates an empty cursor store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncCursor for MemorySyncCursor {
    fn get(&self, collection: &str) -> SyncResult<Timestamp> {
        Ok(self
            .cursors
            .lock()
            .get(collection)
            .copied()
            .unwrap_or(Timestamp::EPOCH))
    }

    fn set(&self, collection: &str, at: Timestamp) -> SyncResult<()> {
        advance(&mut self.cursors.lock(), collection, at);
        Ok(())
    }

    fn reset(&self, collection: &str) -> SyncResult<()> {
        self.cursors.lock().remove(collection);
        Ok(())
    }
}

/// Cursors persisted as a CBOR map in a single file.
///
/// Every change rewrites the file atomically.
#[derive(Debug)]
pub struct FileSyncCursor {
    path: PathBuf,
    cursors: Mutex<BTreeMap<String, Timestamp>>,
}

impl FileSyncCursor {
    /// Opens the cursor file, starting empty if it does not exist.
    pub fn open(path: &Path) -> SyncResult<Self> {
        let cursors = match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => ciborium::from_reader(bytes.as_slice()).map_err(SyncError::cursor)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(SyncError::cursor(err)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            cursors: Mutex::new(cursors),
        })
    }

    /// Returns the cursor file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every stored cursor.
    pub fn all(&self) -> BTreeMap<String, Timestamp> {
        self.cursors.lock().clone()
    }

    fn persist(&self, cursors: &BTreeMap<String, Timestamp>) -> SyncResult<()> {
        let mut bytes = Vec::new();
        ciborium::into_writer(cursors, &mut bytes).map_err(SyncError::cursor)?;
        write_atomic(&self.path, &bytes).map_err(SyncError::cursor)
    }
}

impl SyncCursor for FileSyncCursor {
    fn get(&self, collection: &str) -> SyncResult<Timestamp> {
        Ok(self
            .cursors
            .lock()
            .get(collection)
            .copied()
            .unwrap_or(Timestamp::EPOCH))
    }

    fn set(&self, collection: &str, at: Timestamp) -> SyncResult<()> {
        let mut cursors = self.cursors.lock();
        let mut next = cursors.clone();
        if advance(&mut next, collection, at) {
            self.persist(&next)?;
            *cursors = next;
        }
        Ok(())
    }

    fn reset(&self, collection: &str) -> SyncResult<()> {
        let mut cursors = self.cursors.lock();
        let mut next = cursors.clone();
        if next.remove(collection).is_some() {
            self.persist(&next)?;
            *cursors = next;
        }
        Ok(())
    }
}

/// Moves the cursor forward. Returns false if `at` would rewind it.
fn advance(cursors: &mut BTreeMap<String, Timestamp>, collection: &str, at: Timestamp) -> bool {
    match cursors.get(collection) {
        Some(current) if *current >= at => {
            if *current > at {
                tracing::debug!(collection, %current, requested = %at, "ignoring cursor rewind");
            }
            false
        }
        _ => {
            cursors.insert(collection.to_string(), at);
            true
        }
    }
}
