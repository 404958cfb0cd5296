//! Journal backend trait definition.

use crate::error::StorageResult;

/// A durable, append-only byte log.
///
/// The local replica writes one frame per committed mutation and replays
/// the whole log when it is reopened. The backend knows nothing about
/// frame boundaries; framing and checksums belong to the caller.
///
/// # Invariants
///
/// - `append` returns the offset where the data starts
/// - `read_all` returns every byte appended (or rewritten) so far
/// - after `sync` returns, appended data survives process termination
/// - `rewrite` replaces the whole log atomically: a crash leaves either
///   the old image or the new one, never a mix
pub trait JournalBackend: Send + Sync {
    /// Reads the complete journal contents.
    fn read_all(&self) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the journal.
    ///
    /// Returns the offset where the data was written.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Makes all appended data durable.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the journal in bytes.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the journal to `new_size` bytes.
    ///
    /// Used to drop a torn trailing frame after a crash.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Atomically replaces the whole journal with `data`.
    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()>;
}
