//! In-memory journal backend.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory journal.
///
/// Clones share the same bytes, so a test can drop a store and reopen a
/// new one over the same journal to exercise replay. Writes can be made
/// to fail on demand to exercise local storage failures.
///
/// # Example
///
/// ```rust
/// use replica_storage::{JournalBackend, MemoryJournal};
///
/// let mut journal = MemoryJournal::new();
/// let reopened = journal.clone();
/// journal.append(b"frame").unwrap();
/// assert_eq!(reopened.read_all().unwrap(), b"frame");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryJournal {
    data: Arc<RwLock<Vec<u8>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryJournal {
    /// Creates a new empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a journal with pre-existing contents.
    ///
    /// Useful for testing recovery from torn writes.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a copy of the journal contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StorageError::WriteRejected("memory journal is read-only".into()))
        } else {
            Ok(())
        }
    }
}

impl JournalBackend for MemoryJournal {
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        Ok(self.data())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        self.check_writable()?;
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_writable()?;
        let mut data = self.data.write();
        let size = data.len() as u64;

        if new_size > size {
            return Err(StorageError::TruncatePastEnd {
                requested: new_size,
                size,
            });
        }

        data.truncate(new_size as usize);
        Ok(())
    }

    fn rewrite(&mut self, new_data: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        *self.data.write() = new_data.to_vec();
        Ok(())
    }
}
