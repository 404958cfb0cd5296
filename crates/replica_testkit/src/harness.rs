//! Pre-wired sync engines for tests.
//!
//! A [`SyncHarness`] couples an engine with an in-memory remote, both
//! stamping times from one [`ManualClock`]. Tests move time explicitly
//! with [`SyncHarness::tick`], which makes cursors and conflict ordering
//! deterministic.

use crate::fixtures::{note, Note};
use replica_core::{
    JournalLocalStore, JournalOptions, LocalStore, ManualClock, MemoryLocalStore, ReplicaDir,
    SyncRecord, Timestamp,
};
use replica_storage::{FileJournal, MemoryJournal};
use replica_sync::{
    ConflictResolver, FileSyncCursor, MemoryRemoteStore, MemorySyncCursor, SyncConfig, SyncCursor,
    SyncEngine,
};
use std::sync::Arc;
use std::time::Duration;

/// Time at which every harness clock starts.
pub const START: Timestamp = Timestamp(1_000);

/// The remote store used by harnesses.
pub type NoteRemote = Arc<MemoryRemoteStore<Note>>;

/// An engine over notes and the harness remote.
pub type NoteEngine<L> = SyncEngine<Note, L, NoteRemote>;

/// A journal store kept in memory.
pub type MemoryJournalStore = JournalLocalStore<Note, MemoryJournal>;

/// A journal store kept in a replica directory.
pub type FileJournalStore = JournalLocalStore<Note, FileJournal>;

/// An engine, its remote and their shared clock.
pub struct SyncHarness<L: LocalStore<Note>> {
    /// The engine under test.
    pub engine: NoteEngine<L>,
    /// The remote the engine talks to.
    pub remote: NoteRemote,
    /// The clock shared by engine and remote.
    pub clock: Arc<ManualClock>,
}

impl SyncHarness<MemoryLocalStore<Note>> {
    /// Creates a harness over an in-memory local store.
    pub fn memory(config: SyncConfig) -> Self {
        Self::with_parts(config, MemoryLocalStore::new(), MemorySyncCursor::new())
    }
}

impl SyncHarness<MemoryJournalStore> {
    /// Creates a harness over a journal store kept in memory.
    pub fn memory_journal(config: SyncConfig) -> Self {
        let store = JournalLocalStore::open(MemoryJournal::new(), JournalOptions::default())
            .expect("Failed to open journal store");
        Self::with_parts(config, store, MemorySyncCursor::new())
    }
}

impl SyncHarness<FileJournalStore> {
    /// Creates a harness persisted in `dir`, cursor included.
    pub fn replica(dir: &ReplicaDir, config: SyncConfig) -> Self {
        let (clock, remote) = new_remote();
        Self::replica_with(dir, config, clock, remote)
    }

    /// Like [`SyncHarness::replica`], but continues with the clock and
    /// remote of an earlier harness (see [`SyncHarness::into_parts`]).
    pub fn replica_with(
        dir: &ReplicaDir,
        config: SyncConfig,
        clock: Arc<ManualClock>,
        remote: NoteRemote,
    ) -> Self {
        let store = dir
            .open_store(JournalOptions::default())
            .expect("Failed to open replica store");
        let cursor = FileSyncCursor::open(&dir.cursor_path()).expect("Failed to open cursor file");
        Self::assemble(config, store, cursor, clock, remote)
    }
}

impl<L: LocalStore<Note>> SyncHarness<L> {
    /// Creates a harness over the given local store and cursor.
    pub fn with_parts(config: SyncConfig, local: L, cursor: impl SyncCursor + 'static) -> Self {
        let (clock, remote) = new_remote();
        Self::assemble(config, local, cursor, clock, remote)
    }

    fn assemble(
        config: SyncConfig,
        local: L,
        cursor: impl SyncCursor + 'static,
        clock: Arc<ManualClock>,
        remote: NoteRemote,
    ) -> Self {
        let engine =
            SyncEngine::new(config, local, Arc::clone(&remote), cursor).with_clock(clock.clone());
        Self {
            engine,
            remote,
            clock,
        }
    }

    /// Drops the engine and local store, keeping the clock and remote.
    pub fn into_parts(self) -> (Arc<ManualClock>, NoteRemote) {
        (self.clock, self.remote)
    }

    /// Replaces the engine's conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ConflictResolver<Note> + 'static) -> Self {
        self.engine = self.engine.with_resolver(resolver);
        self
    }

    /// Advances the shared clock and returns the new time.
    pub fn tick(&self, millis: u64) -> Timestamp {
        self.clock.advance(Duration::from_millis(millis))
    }

    /// Returns the current time of the shared clock.
    pub fn now(&self) -> Timestamp {
        use replica_core::Clock;
        self.clock.now()
    }

    /// Writes a new note on the remote as another client would.
    pub fn remote_put(&self, title: &str) -> Note {
        self.remote.put(note(title))
    }

    /// Changes the title of a remote note as another client would.
    pub fn remote_edit(&self, id: &str, title: &str) -> Note {
        let mut current = self.remote.get(id).expect("No such remote note");
        current.title = title.to_string();
        self.remote.put(current)
    }

    /// Returns a local record, panicking if it is missing.
    pub fn local(&self, id: &str) -> SyncRecord<Note> {
        self.engine
            .get(id)
            .expect("Failed to read local store")
            .unwrap_or_else(|| panic!("no local record '{id}'"))
    }

    /// Returns every local record id, in key order.
    pub fn local_ids(&self) -> Vec<String> {
        self.engine
            .local()
            .scan(&|_| true)
            .expect("Failed to scan local store")
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    /// Returns the titles of live local records, sorted.
    pub fn local_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .engine
            .local()
            .scan(&|r| !r.deleted)
            .expect("Failed to scan local store")
            .into_iter()
            .map(|r| r.payload.title)
            .collect();
        titles.sort();
        titles
    }

    /// Returns the titles of remote records, sorted.
    pub fn remote_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self.remote.records().into_iter().map(|n| n.title).collect();
        titles.sort();
        titles
    }
}

fn new_remote() -> (Arc<ManualClock>, NoteRemote) {
    let clock = Arc::new(ManualClock::new(START));
    let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
    (clock, remote)
}
