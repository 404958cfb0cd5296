//! Journaled local store.
//!
//! Every mutation is appended to a [`JournalBackend`] as one frame before
//! the in-memory index changes. Opening the store replays the journal.
//!
//! # Frame layout
//!
//! ```text
//! | magic "RJNL" (4) | version (2) | kind (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! Integers are little endian. The payload is CBOR. The checksum covers
//! every byte before it.
//!
//! # Recovery
//!
//! A trailing frame that is incomplete or fails its checksum is the
//! remains of an interrupted write: it is dropped and the journal is
//! truncated to the last good frame. Damage anywhere else is reported as
//! [`CoreError::CorruptJournal`].

use super::state::StoreState;
use super::{Change, LocalStore, Mutation};
use crate::error::{CoreError, CoreResult};
use crate::record::{Record, SyncRecord};
use crate::watch::{Predicate, Watch};
use parking_lot::RwLock;
use replica_storage::JournalBackend;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Magic bytes identifying a journal frame.
const FRAME_MAGIC: [u8; 4] = *b"RJNL";

/// Current journal format version.
const FRAME_VERSION: u16 = 1;

/// magic (4) + version (2) + kind (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum FrameKind {
    Upsert = 1,
    Delete = 2,
    Replace = 3,
    Clear = 4,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Upsert),
            2 => Some(Self::Delete),
            3 => Some(Self::Replace),
            4 => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Tuning knobs for a [`JournalLocalStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalOptions {
    /// Sync the journal after every mutation.
    pub sync_on_write: bool,
    /// Never compact automatically below this many frames.
    pub compact_min_frames: u64,
    /// Compact automatically once frames exceed live records times this.
    pub compact_ratio: u64,
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            compact_min_frames: 1024,
            compact_ratio: 4,
        }
    }
}

impl JournalOptions {
    /// Sets whether every mutation is synced to stable storage.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the minimum frame count before automatic compaction.
    #[must_use]
    pub fn with_compact_min_frames(mut self, frames: u64) -> Self {
        self.compact_min_frames = frames;
        self
    }

    /// Sets the frames-per-live-record ratio that triggers compaction.
    ///
    /// A ratio of zero disables automatic compaction.
    #[must_use]
    pub fn with_compact_ratio(mut self, ratio: u64) -> Self {
        self.compact_ratio = ratio;
        self
    }

    fn should_compact(&self, frames: u64, live: usize) -> bool {
        if self.compact_ratio == 0 {
            return false;
        }
        let threshold = (live as u64)
            .saturating_mul(self.compact_ratio)
            .max(self.compact_min_frames);
        frames > threshold
    }
}

struct Inner<R, B> {
    state: StoreState<R>,
    backend: B,
    frames: u64,
}

/// A [`LocalStore`] persisted through an append-only journal.
///
/// # Example
///
/// ```rust,ignore
/// use replica_core::{JournalLocalStore, JournalOptions, LocalStore};
/// use replica_storage::MemoryJournal;
///
/// let store: JournalLocalStore<Note, _> =
///     JournalLocalStore::open(MemoryJournal::new(), JournalOptions::default())?;
/// store.upsert(record)?;
/// ```
pub struct JournalLocalStore<R, B> {
    inner: RwLock<Inner<R, B>>,
    options: JournalOptions,
}

impl<R: Record, B: JournalBackend> JournalLocalStore<R, B> {
    /// Opens a store over `backend`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read, or if a frame in the
    /// middle of the journal is damaged.
    pub fn open(mut backend: B, options: JournalOptions) -> CoreResult<Self> {
        let (state, frames) = replay(&mut backend)?;
        tracing::debug!(frames, records = state.len(), "journal replayed");
        Ok(Self {
            inner: RwLock::new(Inner {
                state,
                backend,
                frames,
            }),
            options,
        })
    }

    /// Returns the number of frames in the journal.
    pub fn frame_count(&self) -> u64 {
        self.inner.read().frames
    }

    /// Returns the journal size in bytes.
    pub fn journal_size(&self) -> CoreResult<u64> {
        Ok(self.inner.read().backend.size()?)
    }

    /// Returns the options this store was opened with.
    pub fn options(&self) -> &JournalOptions {
        &self.options
    }

    /// Rewrites the journal to hold only the live records.
    pub fn compact(&self) -> CoreResult<()> {
        let mut inner = self.inner.write();
        compact(&mut inner)
    }

    fn mutate(&self, mutation: Mutation<R>) -> CoreResult<bool> {
        let mut inner = self.inner.write();
        self.commit(&mut inner, mutation)
    }

    /// Journals and applies a mutation while the caller holds the lock.
    fn commit(&self, inner: &mut Inner<R, B>, mutation: Mutation<R>) -> CoreResult<bool> {
        mutation.validate()?;
        let frame = encode_mutation(&mutation)?;

        append_frame(&mut inner.backend, &frame, self.options.sync_on_write)?;
        inner.frames += 1;
        let changed = inner.state.apply(mutation);

        if self.options.should_compact(inner.frames, inner.state.len()) {
            // The mutation is already durable; a failed compaction only
            // leaves a longer journal behind.
            if let Err(err) = compact(inner) {
                tracing::warn!(error = %err, "automatic compaction failed");
            }
        }
        Ok(changed)
    }
}

impl<R: Record, B: JournalBackend> LocalStore<R> for JournalLocalStore<R, B> {
    fn upsert(&self, record: SyncRecord<R>) -> CoreResult<()> {
        self.mutate(Mutation::Upsert(record)).map(|_| ())
    }

    fn delete(&self, id: &str) -> CoreResult<bool> {
        if !self.inner.read().state.contains(id) {
            return Ok(false);
        }
        self.mutate(Mutation::Delete(id.to_string()))
    }

    fn get(&self, id: &str) -> CoreResult<Option<SyncRecord<R>>> {
        Ok(self.inner.read().state.get(id))
    }

    fn scan(&self, predicate: &dyn Fn(&SyncRecord<R>) -> bool) -> CoreResult<Vec<SyncRecord<R>>> {
        Ok(self.inner.read().state.scan(predicate))
    }

    fn watch(&self, predicate: Predicate<R>) -> CoreResult<Watch<R>> {
        Ok(self.inner.write().state.subscribe(predicate))
    }

    fn clear(&self) -> CoreResult<()> {
        self.mutate(Mutation::Clear).map(|_| ())
    }

    fn replace(&self, old_id: &str, record: SyncRecord<R>) -> CoreResult<()> {
        self.mutate(Mutation::Replace {
            old_id: old_id.to_string(),
            record,
        })
        .map(|_| ())
    }

    fn modify(
        &self,
        id: &str,
        decide: &mut dyn FnMut(Option<&SyncRecord<R>>) -> Change<R>,
    ) -> CoreResult<bool> {
        let mut inner = self.inner.write();
        let change = decide(inner.state.peek(id));
        match Mutation::from_change(id, change, inner.state.contains(id)) {
            Some(mutation) => self.commit(&mut inner, mutation),
            None => Ok(false),
        }
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(self.inner.read().state.len())
    }
}

/// Appends a frame, rolling the journal back if the write does not finish.
fn append_frame<B: JournalBackend>(backend: &mut B, frame: &[u8], sync: bool) -> CoreResult<()> {
    let before = backend.size()?;
    let written = backend
        .append(frame)
        .and_then(|_| if sync { backend.sync() } else { Ok(()) });
    if let Err(err) = written {
        if let Err(rollback) = backend.truncate(before) {
            tracing::warn!(error = %rollback, size = before, "journal rollback failed");
        }
        return Err(err.into());
    }
    Ok(())
}

fn compact<R: Record, B: JournalBackend>(inner: &mut Inner<R, B>) -> CoreResult<()> {
    let mut bytes = encode_frame(FrameKind::Clear, &[]);
    let mut frames = 1;
    for record in inner.state.records() {
        bytes.extend(encode_frame(FrameKind::Upsert, &to_cbor(record)?));
        frames += 1;
    }
    inner.backend.rewrite(&bytes)?;
    tracing::info!(
        before = inner.frames,
        after = frames,
        bytes = bytes.len(),
        "journal compacted"
    );
    inner.frames = frames;
    Ok(())
}

fn replay<R: Record, B: JournalBackend>(backend: &mut B) -> CoreResult<(StoreState<R>, u64)> {
    let data = backend.read_all()?;
    let mut state = StoreState::new();
    let mut frames = 0;
    let mut offset = 0;

    while offset < data.len() {
        match read_frame(&data[offset..]) {
            FrameRead::Complete { kind, payload, len } => {
                let mutation = decode_mutation(kind, payload).map_err(|err| {
                    CoreError::CorruptJournal {
                        offset: offset as u64,
                        message: err.to_string(),
                    }
                })?;
                state.apply_silently(mutation);
                frames += 1;
                offset += len;
            }
            FrameRead::Torn(reason) => {
                tracing::warn!(
                    offset,
                    dropped = data.len() - offset,
                    reason,
                    "discarding torn journal tail"
                );
                backend.truncate(offset as u64)?;
                backend.sync()?;
                break;
            }
            FrameRead::Corrupt(message) => {
                return Err(CoreError::CorruptJournal {
                    offset: offset as u64,
                    message,
                });
            }
        }
    }
    Ok((state, frames))
}

enum FrameRead<'a> {
    Complete {
        kind: FrameKind,
        payload: &'a [u8],
        len: usize,
    },
    Torn(&'static str),
    Corrupt(String),
}

fn read_frame(buf: &[u8]) -> FrameRead<'_> {
    if buf.len() < HEADER_SIZE {
        return FrameRead::Torn("incomplete header");
    }
    if buf[0..4] != FRAME_MAGIC {
        return FrameRead::Corrupt("invalid magic".to_string());
    }
    let version = u16::from_le_bytes([buf[4], buf[5]]);
    if version > FRAME_VERSION {
        return FrameRead::Corrupt(format!("unsupported version {version}"));
    }
    let Some(kind) = FrameKind::from_byte(buf[6]) else {
        return FrameRead::Corrupt(format!("unknown frame kind {}", buf[6]));
    };
    let payload_len = u32::from_le_bytes([buf[7], buf[8], buf[9], buf[10]]) as usize;
    let len = HEADER_SIZE + payload_len + CRC_SIZE;
    if buf.len() < len {
        return FrameRead::Torn("incomplete frame");
    }

    let body_end = HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        buf[body_end],
        buf[body_end + 1],
        buf[body_end + 2],
        buf[body_end + 3],
    ]);
    if compute_crc32(&buf[..body_end]) != stored {
        if buf.len() == len {
            return FrameRead::Torn("checksum mismatch");
        }
        return FrameRead::Corrupt("checksum mismatch".to_string());
    }

    FrameRead::Complete {
        kind,
        payload: &buf[HEADER_SIZE..body_end],
        len,
    }
}

fn encode_frame(kind: FrameKind, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.extend_from_slice(&FRAME_MAGIC);
    buf.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    buf.push(kind as u8);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

fn encode_mutation<R: Record>(mutation: &Mutation<R>) -> CoreResult<Vec<u8>> {
    let frame = match mutation {
        Mutation::Upsert(record) => encode_frame(FrameKind::Upsert, &to_cbor(record)?),
        Mutation::Delete(id) => encode_frame(FrameKind::Delete, &to_cbor(id)?),
        Mutation::Replace { old_id, record } => {
            encode_frame(FrameKind::Replace, &to_cbor(&(old_id, record))?)
        }
        Mutation::Clear => encode_frame(FrameKind::Clear, &[]),
    };
    Ok(frame)
}

fn decode_mutation<R: Record>(kind: FrameKind, payload: &[u8]) -> CoreResult<Mutation<R>> {
    Ok(match kind {
        FrameKind::Upsert => Mutation::Upsert(from_cbor(payload)?),
        FrameKind::Delete => Mutation::Delete(from_cbor(payload)?),
        FrameKind::Replace => {
            let (old_id, record) = from_cbor(payload)?;
            Mutation::Replace { old_id, record }
        }
        FrameKind::Clear => Mutation::Clear,
    })
}

fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(CoreError::codec)?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(CoreError::codec)
}

/// CRC32 (IEEE polynomial), table driven.
fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{item, Item};
    use crate::types::Timestamp;
    use proptest::prelude::*;
    use replica_storage::{FileJournal, MemoryJournal};
    use std::sync::Arc;
    use tempfile::tempdir;

    type Store = JournalLocalStore<Item, MemoryJournal>;

    fn open(journal: &MemoryJournal) -> Store {
        JournalLocalStore::open(journal.clone(), JournalOptions::default()).unwrap()
    }

    fn dirty(id: &str, body: &str) -> SyncRecord<Item> {
        SyncRecord::dirty(id, item(id, body), Timestamp(1))
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    #[test]
    fn reopen_replays_mutations() {
        let journal = MemoryJournal::new();
        {
            let store = open(&journal);
            store.upsert(dirty("local_a", "one")).unwrap();
            store.upsert(dirty("S2", "two")).unwrap();
            store
                .replace(
                    "local_a",
                    SyncRecord::clean("S1", item("S1", "one"), Timestamp(2)),
                )
                .unwrap();
            store.delete("S2").unwrap();
        }

        let store = open(&journal);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get("local_a").unwrap().is_none());
        let s1 = store.get("S1").unwrap().unwrap();
        assert!(!s1.dirty);
        assert_eq!(s1.payload.body, "one");
        assert_eq!(store.frame_count(), 4);
    }

    #[test]
    fn modify_is_journaled_as_one_frame() {
        let journal = MemoryJournal::new();
        {
            let store = open(&journal);
            store.upsert(dirty("local_a", "one")).unwrap();
            let moved = store
                .modify("local_a", &mut |current| match current {
                    Some(r) if r.dirty => Change::Put(SyncRecord::clean(
                        "S1",
                        item("S1", &r.payload.body),
                        Timestamp(2),
                    )),
                    _ => Change::Keep,
                })
                .unwrap();
            assert!(moved);
            assert!(!store.modify("S1", &mut |_| Change::Keep).unwrap());
            assert_eq!(store.frame_count(), 2);
        }

        let store = open(&journal);
        assert!(store.get("local_a").unwrap().is_none());
        assert_eq!(store.get("S1").unwrap().unwrap().payload.body, "one");
    }

    #[test]
    fn deleting_a_missing_record_writes_nothing() {
        let journal = MemoryJournal::new();
        let store = open(&journal);
        assert!(!store.delete("nope").unwrap());
        assert_eq!(store.frame_count(), 0);
        assert!(journal.data().is_empty());
    }

    #[test]
    fn torn_tail_is_truncated() {
        let journal = MemoryJournal::new();
        {
            let store = open(&journal);
            store.upsert(dirty("S1", "a")).unwrap();
            store.upsert(dirty("S2", "b")).unwrap();
        }
        let mut bytes = journal.data();
        let good = bytes.len();
        bytes.truncate(good - 3);
        let torn = MemoryJournal::with_data(bytes);

        let store = open(&torn);
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.get("S1").unwrap().is_some());
        assert!(torn.data().len() < good - 3);

        // The journal is usable again after recovery.
        store.upsert(dirty("S3", "c")).unwrap();
        drop(store);
        assert_eq!(open(&torn).len().unwrap(), 2);
    }

    #[test]
    fn bad_checksum_on_last_frame_is_torn() {
        let journal = MemoryJournal::new();
        {
            let store = open(&journal);
            store.upsert(dirty("S1", "a")).unwrap();
            store.upsert(dirty("S2", "b")).unwrap();
        }
        let mut bytes = journal.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let store = open(&MemoryJournal::with_data(bytes));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn damage_in_the_middle_is_an_error() {
        let journal = MemoryJournal::new();
        {
            let store = open(&journal);
            store.upsert(dirty("S1", "a")).unwrap();
            store.upsert(dirty("S2", "b")).unwrap();
        }
        let mut bytes = journal.data();
        bytes[HEADER_SIZE] ^= 0xFF;

        let result = Store::open(MemoryJournal::with_data(bytes), JournalOptions::default());
        assert!(matches!(
            result,
            Err(CoreError::CorruptJournal { offset: 0, .. })
        ));
    }

    #[test]
    fn failed_write_leaves_store_unchanged() {
        let journal = MemoryJournal::new();
        let store = open(&journal);
        store.upsert(dirty("S1", "a")).unwrap();
        let watch = store.watch(Arc::new(|_: &SyncRecord<Item>| true)).unwrap();
        watch.latest();

        journal.set_fail_writes(true);
        assert!(store.upsert(dirty("S2", "b")).is_err());
        assert!(store.clear().is_err());
        journal.set_fail_writes(false);

        assert_eq!(store.len().unwrap(), 1);
        assert!(watch.try_recv().is_err());
        assert_eq!(open(&journal).len().unwrap(), 1);
    }

    #[test]
    fn compaction_keeps_live_records() {
        let journal = MemoryJournal::new();
        let store = open(&journal);
        for i in 0..20 {
            store.upsert(dirty("S1", &format!("v{i}"))).unwrap();
        }
        store.upsert(dirty("S2", "b")).unwrap();
        let before = journal.data().len();

        store.compact().unwrap();
        assert_eq!(store.frame_count(), 3);
        assert!(journal.data().len() < before);

        let reopened = open(&journal);
        assert_eq!(reopened.get("S1").unwrap().unwrap().payload.body, "v19");
        assert_eq!(reopened.len().unwrap(), 2);
    }

    #[test]
    fn automatic_compaction() {
        let journal = MemoryJournal::new();
        let options = JournalOptions::default()
            .with_compact_min_frames(8)
            .with_compact_ratio(2);
        let store: Store = JournalLocalStore::open(journal.clone(), options).unwrap();

        for i in 0..9 {
            store.upsert(dirty("S1", &format!("v{i}"))).unwrap();
        }
        // Nine frames for one live record crosses the threshold of eight.
        assert_eq!(store.frame_count(), 2);
        assert_eq!(open(&journal).get("S1").unwrap().unwrap().payload.body, "v8");
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("journal.log");
        {
            let backend = FileJournal::open(&path).unwrap();
            let store: JournalLocalStore<Item, _> =
                JournalLocalStore::open(backend, JournalOptions::default()).unwrap();
            store.upsert(dirty("S1", "a")).unwrap();
            store.compact().unwrap();
            store.upsert(dirty("S2", "b")).unwrap();
        }

        let backend = FileJournal::open(&path).unwrap();
        let store: JournalLocalStore<Item, _> =
            JournalLocalStore::open(backend, JournalOptions::default()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.frame_count(), 3);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Upsert(u8, bool),
        Delete(u8),
        Replace(u8, u8),
        Clear,
        Compact,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0u8..8, any::<bool>()).prop_map(|(k, d)| Op::Upsert(k, d)),
            3 => (0u8..8).prop_map(Op::Delete),
            2 => (0u8..8, 0u8..8).prop_map(|(a, b)| Op::Replace(a, b)),
            1 => Just(Op::Clear),
            1 => Just(Op::Compact),
        ]
    }

    proptest! {
        #[test]
        fn replay_matches_live_state(ops in prop::collection::vec(op(), 0..60)) {
            let journal = MemoryJournal::new();
            let store = open(&journal);
            for (i, op) in ops.iter().enumerate() {
                let body = format!("v{i}");
                match op {
                    Op::Upsert(k, dirty_flag) => {
                        let id = format!("S{k}");
                        let record = if *dirty_flag {
                            SyncRecord::dirty(id.clone(), item(&id, &body), Timestamp(i as u64))
                        } else {
                            SyncRecord::clean(id.clone(), item(&id, &body), Timestamp(i as u64))
                        };
                        store.upsert(record).unwrap();
                    }
                    Op::Delete(k) => {
                        store.delete(&format!("S{k}")).unwrap();
                    }
                    Op::Replace(a, b) => {
                        let id = format!("S{b}");
                        let record = SyncRecord::clean(id.clone(), item(&id, &body), Timestamp(i as u64));
                        store.replace(&format!("S{a}"), record).unwrap();
                    }
                    Op::Clear => store.clear().unwrap(),
                    Op::Compact => store.compact().unwrap(),
                }
            }

            let live = store.scan(&|_| true).unwrap();
            let replayed = open(&journal).scan(&|_| true).unwrap();
            prop_assert_eq!(live, replayed);
        }
    }
}
