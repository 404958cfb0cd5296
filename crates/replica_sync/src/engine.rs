//! The sync engine.
//!
//! A [`SyncEngine`] owns the four collaborators of one synchronized
//! collection (local store, remote store, cursor, conflict resolver) and
//! runs sync cycles over them. Only one cycle runs at a time per engine.

use crate::config::SyncConfig;
use crate::conflict::{ConflictResolver, RemoteWins};
use crate::cursor::SyncCursor;
use crate::error::{SyncError, SyncResult};
use crate::outcome::{RecordFailure, RecordResult, SyncOutcome};
use crate::remote::{FetchRequest, RemoteError, RemoteErrorKind, RemoteStore};
use parking_lot::{Mutex, RwLock};
use replica_core::{
    is_client_id, new_client_id, Change, Clock, LocalStore, Predicate, Record, SyncRecord,
    SystemClock, Timestamp, Watch,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle has run yet.
    Idle,
    /// Pulling remote changes.
    Pulling,
    /// Pushing local changes.
    Pushing,
    /// The last cycle completed.
    Synced,
    /// The last cycle aborted.
    Error,
}

impl SyncState {
    /// Returns true while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Pulling | SyncState::Pushing)
    }
}

/// Statistics accumulated over the engine's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Cycles that completed.
    pub cycles_completed: u64,
    /// Cycles that aborted.
    pub cycles_failed: u64,
    /// Remote records applied locally.
    pub records_pulled: u64,
    /// Records created or updated remotely.
    pub records_pushed: u64,
    /// Tombstones deleted remotely.
    pub records_deleted: u64,
    /// Conflicts settled by the resolver.
    pub conflicts_resolved: u64,
    /// Per-record push failures.
    pub record_failures: u64,
    /// Retries performed by `sync_with_retry`.
    pub retries: u64,
    /// Cursor stored by the last completed cycle.
    pub last_sync_time: Option<Timestamp>,
    /// Error of the last aborted cycle, cleared on success.
    pub last_error: Option<String>,
}

/// Result of pushing one record, before it is tallied.
struct Pushed {
    result: RecordResult,
    conflict_resolved: bool,
}

impl Pushed {
    fn done(result: RecordResult) -> Self {
        Self {
            result,
            conflict_resolved: false,
        }
    }

    fn resolved(result: RecordResult) -> Self {
        Self {
            result,
            conflict_resolved: true,
        }
    }
}

/// Synchronizes one collection between a local and a remote store.
///
/// # Example
///
/// ```rust,ignore
/// let engine = SyncEngine::new(config, local, remote, cursor)
///     .with_resolver(LastWriterWins);
///
/// engine.save_locally(note)?;
/// let outcome = engine.sync(None)?;
/// for failure in &outcome.failures {
///     eprintln!("{} failed: {}", failure.id, failure.message);
/// }
/// ```
pub struct SyncEngine<R: Record, L, S> {
    config: SyncConfig,
    local: L,
    remote: S,
    cursor: Box<dyn SyncCursor>,
    resolver: Box<dyn ConflictResolver<R>>,
    clock: Arc<dyn Clock>,
    cycle: Mutex<()>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
}

impl<R, L, S> SyncEngine<R, L, S>
where
    R: Record,
    L: LocalStore<R>,
    S: RemoteStore<R>,
{
    /// Creates an engine with the remote-wins resolver and the system clock.
    pub fn new(config: SyncConfig, local: L, remote: S, cursor: impl SyncCursor + 'static) -> Self {
        Self {
            config,
            local,
            remote,
            cursor: Box::new(cursor),
            resolver: Box::new(RemoteWins),
            clock: Arc::new(SystemClock),
            cycle: Mutex::new(()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Replaces the conflict resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: impl ConflictResolver<R> + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Replaces the clock used for cycle times and local mutations.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the local store.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// Returns the remote store.
    pub fn remote(&self) -> &S {
        &self.remote
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Cancels the running cycle at its next record boundary.
    ///
    /// A cycle resets the flag when it starts, so cancelling while no cycle
    /// runs has no effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    // ----- application surface -----

    /// Stores a record locally and marks it for push.
    ///
    /// A record without an id gets a client id. Returns the id it is
    /// stored under.
    pub fn save_locally(&self, mut record: R) -> SyncResult<String> {
        let id = match record.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => new_client_id(),
        };
        record.set_id(Some(id.clone()));
        self.local
            .upsert(SyncRecord::dirty(id.clone(), record, self.clock.now()))?;
        tracing::debug!(collection = %self.config.collection, %id, "saved locally");
        Ok(id)
    }

    /// Marks a record for remote deletion.
    ///
    /// A record that never reached the server is removed immediately.
    /// Returns false if there is no such record.
    pub fn delete_locally(&self, id: &str) -> SyncResult<bool> {
        let now = self.clock.now();
        let mut found = false;
        self.local.modify(id, &mut |current| match current {
            None => Change::Keep,
            Some(record) => {
                found = true;
                if record.is_client_generated() {
                    Change::Remove
                } else {
                    Change::Put(record.clone().tombstone(now))
                }
            }
        })?;
        if found {
            tracing::debug!(collection = %self.config.collection, id, "deleted locally");
        }
        Ok(found)
    }

    /// Looks up a record, tombstones included.
    pub fn get(&self, id: &str) -> SyncResult<Option<SyncRecord<R>>> {
        Ok(self.local.get(id)?)
    }

    /// Watches the live records, optionally narrowed by `filter`.
    ///
    /// Tombstones are never emitted.
    pub fn watch_all(&self, filter: Option<Predicate<R>>) -> SyncResult<Watch<R>> {
        let predicate: Predicate<R> = match filter {
            Some(filter) => Arc::new(move |r: &SyncRecord<R>| !r.deleted && filter(r)),
            None => Arc::new(|r: &SyncRecord<R>| !r.deleted),
        };
        Ok(self.local.watch(predicate)?)
    }

    /// Returns the number of records waiting to be pushed.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.local.scan(&|r| r.dirty)?.len())
    }

    /// Removes every local record and forgets the cursor.
    ///
    /// Waits for a running cycle to finish first.
    pub fn clear(&self) -> SyncResult<()> {
        let _cycle = self.cycle.lock();
        self.local.clear()?;
        self.cursor.reset(&self.config.collection)?;
        tracing::info!(collection = %self.config.collection, "local replica cleared");
        Ok(())
    }

    // ----- sync cycle -----

    /// Runs one sync cycle, waiting for a running one to finish first.
    pub fn sync(&self, filter: Option<S::Filter>) -> SyncResult<SyncOutcome> {
        let _cycle = self.cycle.lock();
        self.run_cycle(filter)
    }

    /// Runs one sync cycle unless one is already running.
    pub fn try_sync(&self, filter: Option<S::Filter>) -> SyncResult<SyncOutcome> {
        let Some(_cycle) = self.cycle.try_lock() else {
            return Err(SyncError::AlreadyRunning {
                collection: self.config.collection.clone(),
            });
        };
        self.run_cycle(filter)
    }

    /// Performs a sync with retry on transient errors.
    pub fn sync_with_retry(&self, filter: Option<S::Filter>) -> SyncResult<SyncOutcome> {
        let retry_config = &self.config.retry;
        let max_attempts = retry_config.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                thread::sleep(retry_config.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            match self.sync(filter.clone()) {
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    tracing::warn!(
                        collection = %self.config.collection,
                        attempt,
                        error = %e,
                        "sync failed, retrying"
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn run_cycle(&self, filter: Option<S::Filter>) -> SyncResult<SyncOutcome> {
        let start = Instant::now();
        self.cancelled.store(false, Ordering::SeqCst);

        let result = self.cycle_phases(filter, start);
        match &result {
            Ok(outcome) => {
                self.set_state(SyncState::Synced);
                let mut stats = self.stats.write();
                stats.cycles_completed += 1;
                stats.records_pulled += outcome.pulled as u64;
                stats.records_pushed += outcome.pushed as u64;
                stats.records_deleted += outcome.deleted as u64;
                stats.conflicts_resolved += outcome.conflicts_resolved as u64;
                stats.record_failures += outcome.failures.len() as u64;
                stats.last_sync_time = Some(outcome.cursor);
                stats.last_error = None;
                tracing::info!(
                    collection = %self.config.collection,
                    pulled = outcome.pulled,
                    pushed = outcome.pushed,
                    deleted = outcome.deleted,
                    conflicts = outcome.conflicts_resolved,
                    failures = outcome.failures.len(),
                    duration_ms = outcome.duration.as_millis() as u64,
                    "sync cycle completed"
                );
            }
            Err(e) => {
                self.set_state(SyncState::Error);
                let mut stats = self.stats.write();
                stats.cycles_failed += 1;
                stats.last_error = Some(e.to_string());
                tracing::error!(collection = %self.config.collection, error = %e, "sync cycle aborted");
            }
        }
        result
    }

    fn cycle_phases(&self, filter: Option<S::Filter>, start: Instant) -> SyncResult<SyncOutcome> {
        let collection = &self.config.collection;
        let since = self.cursor.get(collection)?;
        let now = self.clock.now();
        let mut outcome = SyncOutcome::default();

        self.set_state(SyncState::Pulling);
        let pulled = self.pull(since, filter)?;
        self.apply_pulled(pulled, now, &mut outcome)?;

        self.check_cancelled()?;
        self.set_state(SyncState::Pushing);
        self.push_dirty(now, &mut outcome)?;

        self.cursor.set(collection, now)?;
        outcome.cursor = self.cursor.get(collection)?;
        outcome.duration = start.elapsed();
        Ok(outcome)
    }

    // ----- pull -----

    /// Fetches every remote record modified after `since`.
    fn pull(&self, since: Timestamp, filter: Option<S::Filter>) -> SyncResult<Vec<R>> {
        let page_size = self.config.page_size.max(1);
        let mut request = FetchRequest {
            since,
            filter,
            offset: 0,
            limit: page_size,
        };
        let mut records = Vec::new();

        loop {
            self.check_cancelled()?;
            let page = self.remote.fetch_since(&request, self.config.deadline())?;
            let len = page.len();
            records.extend(page);
            if len < page_size {
                break;
            }
            request.offset += len;
        }

        tracing::debug!(
            collection = %self.config.collection,
            since = %since,
            records = records.len(),
            "pulled remote changes"
        );
        Ok(records)
    }

    fn apply_pulled(
        &self,
        records: Vec<R>,
        now: Timestamp,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        for remote in records {
            self.check_cancelled()?;

            let Some(id) = remote.id().filter(|id| !id.is_empty()).map(str::to_string) else {
                tracing::warn!(collection = %self.config.collection, "skipping pulled record without id");
                continue;
            };

            let mut conflict = None;
            self.local.modify(&id, &mut |current| match current {
                Some(local) if local.dirty => {
                    let resolved = self.resolve(local, &remote, now);
                    conflict = Some(resolved.dirty);
                    Change::Put(resolved)
                }
                _ => Change::Put(SyncRecord::clean(id.clone(), remote.clone(), now)),
            })?;
            if let Some(unpushed) = conflict {
                outcome.conflicts_resolved += 1;
                tracing::debug!(collection = %self.config.collection, %id, unpushed, "conflict resolved on pull");
            }
            outcome.pulled += 1;
        }
        Ok(())
    }

    /// Runs the resolver and enforces its contract on the result.
    ///
    /// The result is never a tombstone. It stays dirty only if the resolver
    /// kept local changes the remote copy does not have yet.
    fn resolve(&self, local: &SyncRecord<R>, remote: &R, now: Timestamp) -> SyncRecord<R> {
        let remote_id = remote.id().unwrap_or(local.id.as_str()).to_string();
        let mut resolved = self.resolver.resolve(local, remote, now);

        if resolved.id != remote_id {
            tracing::warn!(
                collection = %self.config.collection,
                resolved_id = %resolved.id,
                %remote_id,
                "resolver changed the record id; re-keying to the remote id"
            );
            resolved.id = remote_id.clone();
        }
        if resolved.payload.id() != Some(remote_id.as_str()) {
            resolved.payload.set_id(Some(remote_id));
        }
        resolved.deleted = false;
        resolved
    }

    // ----- push -----

    fn push_dirty(&self, now: Timestamp, outcome: &mut SyncOutcome) -> SyncResult<()> {
        let dirty = self.local.scan(&|r| r.dirty)?;
        if dirty.is_empty() {
            return Ok(());
        }
        tracing::debug!(collection = %self.config.collection, records = dirty.len(), "pushing local changes");

        for chunk in dirty.chunks(self.config.push_concurrency.max(1)) {
            self.check_cancelled()?;

            let results: Vec<SyncResult<Pushed>> = if chunk.len() == 1 {
                vec![self.push_one(&chunk[0], now)]
            } else {
                thread::scope(|scope| {
                    let handles: Vec<_> = chunk
                        .iter()
                        .map(|record| scope.spawn(move || self.push_one(record, now)))
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                        .collect()
                })
            };

            let mut fatal = None;
            for result in results {
                match result {
                    Ok(pushed) => {
                        if pushed.conflict_resolved {
                            outcome.conflicts_resolved += 1;
                        }
                        if let RecordResult::Failed(failure) = &pushed.result {
                            if self.config.fail_fast && fatal.is_none() {
                                fatal = Some(SyncError::RecordFailed(failure.clone()));
                            }
                        }
                        outcome.record(pushed.result);
                    }
                    Err(e) => {
                        fatal.get_or_insert(e);
                    }
                }
            }
            if let Some(e) = fatal {
                return Err(e);
            }
        }
        Ok(())
    }

    fn push_one(&self, record: &SyncRecord<R>, now: Timestamp) -> SyncResult<Pushed> {
        if record.deleted {
            self.push_delete(record)
        } else if record.is_client_generated() {
            self.push_create(record, now, false)
        } else {
            self.push_update(record, now)
        }
    }

    fn push_delete(&self, record: &SyncRecord<R>) -> SyncResult<Pushed> {
        match self.remote.delete(&record.id, self.config.deadline()) {
            Ok(outcome) => {
                self.settle(record, None)?;
                tracing::debug!(collection = %self.config.collection, id = %record.id, ?outcome, "deleted remotely");
                Ok(Pushed::done(RecordResult::Deleted {
                    id: record.id.clone(),
                }))
            }
            Err(e) => self.push_failure(&record.id, e),
        }
    }

    fn push_create(
        &self,
        record: &SyncRecord<R>,
        now: Timestamp,
        after_conflict: bool,
    ) -> SyncResult<Pushed> {
        let mut payload = record.payload.clone();
        payload.set_id(None);

        let saved = match self.remote.create(payload, self.config.deadline()) {
            Ok(saved) => saved,
            Err(e) => return self.push_failure(&record.id, e),
        };
        let server_id = match saved.id() {
            Some(id) if !id.is_empty() && !is_client_id(id) => id.to_string(),
            other => {
                let error = RemoteError::permanent(format!(
                    "create returned an unusable id {other:?}"
                ));
                return self.push_failure(&record.id, error);
            }
        };

        self.settle(record, Some(SyncRecord::clean(server_id.clone(), saved, now)))?;
        tracing::debug!(collection = %self.config.collection, id = %record.id, %server_id, "created remotely");

        let result = RecordResult::Pushed {
            id: record.id.clone(),
            server_id,
        };
        Ok(if after_conflict {
            Pushed::resolved(result)
        } else {
            Pushed::done(result)
        })
    }

    fn push_update(&self, record: &SyncRecord<R>, now: Timestamp) -> SyncResult<Pushed> {
        let mut payload = record.payload.clone();
        payload.set_id(Some(record.id.clone()));

        match self.remote.update(payload, self.config.deadline()) {
            Ok(saved) => {
                self.settle(record, Some(SyncRecord::clean(record.id.clone(), saved, now)))?;
                tracing::debug!(collection = %self.config.collection, id = %record.id, "updated remotely");
                Ok(Pushed::done(RecordResult::Pushed {
                    id: record.id.clone(),
                    server_id: record.id.clone(),
                }))
            }
            Err(e) if e.kind == RemoteErrorKind::Conflict => self.push_after_conflict(record, now),
            Err(e) if e.kind == RemoteErrorKind::NotFound => {
                tracing::debug!(collection = %self.config.collection, id = %record.id, "remote copy gone; re-creating");
                self.push_create(record, now, false)
            }
            Err(e) => self.push_failure(&record.id, e),
        }
    }

    /// Resolves a rejected update against the current remote copy and
    /// retries it once.
    fn push_after_conflict(&self, record: &SyncRecord<R>, now: Timestamp) -> SyncResult<Pushed> {
        let current = match self.remote.fetch_one(&record.id, self.config.deadline()) {
            Ok(current) => current,
            Err(e) => return self.push_failure(&record.id, e),
        };
        let Some(remote) = current else {
            return self.push_create(record, now, true);
        };

        let resolved = self.resolve(record, &remote, now);
        match self.remote.update(resolved.payload, self.config.deadline()) {
            Ok(saved) => {
                self.settle(record, Some(SyncRecord::clean(record.id.clone(), saved, now)))?;
                tracing::debug!(collection = %self.config.collection, id = %record.id, "conflict resolved on push");
                Ok(Pushed::resolved(RecordResult::Pushed {
                    id: record.id.clone(),
                    server_id: record.id.clone(),
                }))
            }
            Err(e) => self.push_failure(&record.id, e),
        }
    }

    /// Classifies a failed push: transient failures abort the cycle,
    /// everything else fails only this record.
    fn push_failure(&self, id: &str, error: RemoteError) -> SyncResult<Pushed> {
        if error.kind == RemoteErrorKind::Transient {
            return Err(SyncError::Remote(error));
        }
        tracing::warn!(
            collection = %self.config.collection,
            id,
            kind = %error.kind,
            error = %error.message,
            "record push failed"
        );
        Ok(Pushed::done(RecordResult::Failed(RecordFailure::new(
            id, &error,
        ))))
    }

    /// Stores the result of a successful push.
    ///
    /// `settled` replaces the pushed record (under a new key if the server
    /// assigned one); `None` purges it. If the application modified the
    /// record while it was being pushed, the newer local version stays
    /// dirty. It is moved to the server id and adopts the server's
    /// modification time so its own push is not rejected as stale.
    fn settle(&self, pushed: &SyncRecord<R>, settled: Option<SyncRecord<R>>) -> SyncResult<()> {
        let mut settled = settled;
        let mut kept_local = false;

        self.local.modify(&pushed.id, &mut |current| {
            let unchanged = current.is_some_and(|c| {
                c.local_updated_at == pushed.local_updated_at && c.deleted == pushed.deleted
            });
            match (settled.take(), current) {
                (None, Some(_)) if unchanged => Change::Remove,
                (Some(record), _) if unchanged => Change::Put(record),
                (Some(record), Some(newer)) => {
                    kept_local = true;
                    let mut newer = newer.clone();
                    newer.payload.set_id(Some(record.id.clone()));
                    if let Some(at) = record.payload.updated_at() {
                        newer.payload.set_updated_at(at);
                    }
                    newer.id = record.id;
                    Change::Put(newer)
                }
                _ => {
                    kept_local = true;
                    Change::Keep
                }
            }
        })?;

        if kept_local {
            tracing::debug!(
                collection = %self.config.collection,
                id = %pushed.id,
                "record changed during push; keeping local version"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemorySyncCursor;
    use crate::memory_remote::{MemoryRemoteStore, RemoteOp};
    use crate::test_support::{new_doc, Doc};
    use replica_core::{CoreResult, ManualClock, MemoryLocalStore};
    use std::time::Duration;

    type Remote = Arc<MemoryRemoteStore<Doc>>;
    type Engine = SyncEngine<Doc, MemoryLocalStore<Doc>, Remote>;

    fn engine() -> (Engine, Remote, Arc<ManualClock>) {
        engine_over(MemoryLocalStore::new())
    }

    fn engine_over<L: LocalStore<Doc>>(
        local: L,
    ) -> (SyncEngine<Doc, L, Remote>, Remote, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
        let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
        let engine = SyncEngine::new(
            SyncConfig::new("docs"),
            local,
            Arc::clone(&remote),
            MemorySyncCursor::new(),
        )
        .with_clock(clock.clone());
        (engine, remote, clock)
    }

    /// A store where an application edit commits just before the next
    /// conditional write, as if the user typed while a push was in flight.
    #[derive(Default)]
    struct InterleavedEdits {
        inner: MemoryLocalStore<Doc>,
        pending: Mutex<Option<(String, String)>>,
    }

    impl InterleavedEdits {
        fn edit_before_next_write(&self, id: &str, text: &str) {
            *self.pending.lock() = Some((id.to_string(), text.to_string()));
        }
    }

    impl LocalStore<Doc> for InterleavedEdits {
        fn upsert(&self, record: SyncRecord<Doc>) -> CoreResult<()> {
            self.inner.upsert(record)
        }

        fn delete(&self, id: &str) -> CoreResult<bool> {
            self.inner.delete(id)
        }

        fn get(&self, id: &str) -> CoreResult<Option<SyncRecord<Doc>>> {
            self.inner.get(id)
        }

        fn scan(
            &self,
            predicate: &dyn Fn(&SyncRecord<Doc>) -> bool,
        ) -> CoreResult<Vec<SyncRecord<Doc>>> {
            self.inner.scan(predicate)
        }

        fn watch(&self, predicate: Predicate<Doc>) -> CoreResult<Watch<Doc>> {
            self.inner.watch(predicate)
        }

        fn clear(&self) -> CoreResult<()> {
            self.inner.clear()
        }

        fn replace(&self, old_id: &str, record: SyncRecord<Doc>) -> CoreResult<()> {
            self.inner.replace(old_id, record)
        }

        fn modify(
            &self,
            id: &str,
            decide: &mut dyn FnMut(Option<&SyncRecord<Doc>>) -> Change<Doc>,
        ) -> CoreResult<bool> {
            let pending = self.pending.lock().take();
            if let Some((target, text)) = pending {
                if let Some(mut record) = self.inner.get(&target)? {
                    record.payload.text = text;
                    record.dirty = true;
                    record.deleted = false;
                    record.local_updated_at = Timestamp(9_999);
                    self.inner.upsert(record)?;
                }
            }
            self.inner.modify(id, decide)
        }

        fn len(&self) -> CoreResult<usize> {
            self.inner.len()
        }
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Pulling.is_active());
        assert!(SyncState::Pushing.is_active());
        assert!(!SyncState::Idle.is_active());
        assert!(!SyncState::Synced.is_active());
        assert!(!SyncState::Error.is_active());
    }

    #[test]
    fn sync_engine_initial_state() {
        let (engine, _, _) = engine();
        assert_eq!(engine.state(), SyncState::Idle);
        assert_eq!(engine.stats(), SyncStats::default());
        assert_eq!(engine.pending_count().unwrap(), 0);
    }

    #[test]
    fn save_locally_assigns_client_ids() {
        let (engine, _, _) = engine();
        let id = engine.save_locally(new_doc("hello")).unwrap();
        assert!(is_client_id(&id));

        let stored = engine.get(&id).unwrap().unwrap();
        assert!(stored.dirty);
        assert_eq!(stored.payload.id.as_deref(), Some(id.as_str()));
        assert_eq!(stored.local_updated_at, Timestamp(1_000));
        assert_eq!(engine.pending_count().unwrap(), 1);
    }

    #[test]
    fn save_locally_keeps_server_ids() {
        let (engine, _, _) = engine();
        let mut doc = new_doc("x");
        doc.id = Some("S5".into());
        assert_eq!(engine.save_locally(doc).unwrap(), "S5");
    }

    #[test]
    fn delete_locally_purges_unsynced_records() {
        let (engine, _, _) = engine();
        let id = engine.save_locally(new_doc("draft")).unwrap();
        assert!(engine.delete_locally(&id).unwrap());
        assert!(engine.get(&id).unwrap().is_none());
        assert!(!engine.delete_locally(&id).unwrap());
    }

    #[test]
    fn delete_locally_tombstones_synced_records() {
        let (engine, _, _) = engine();
        engine.save_locally(new_doc("x")).unwrap();
        engine.sync(None).unwrap();
        let server_id = engine.local().scan(&|_| true).unwrap()[0].id.clone();

        assert!(engine.delete_locally(&server_id).unwrap());
        let tombstone = engine.get(&server_id).unwrap().unwrap();
        assert!(tombstone.deleted);
        assert!(tombstone.dirty);
    }

    #[test]
    fn successful_cycle_updates_state_and_stats() {
        let (engine, remote, clock) = engine();
        remote.put(new_doc("remote"));
        clock.advance(Duration::from_millis(10));
        engine.save_locally(new_doc("local")).unwrap();

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pulled, 1);
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.cursor, Timestamp(1_010));
        assert_eq!(engine.state(), SyncState::Synced);

        let stats = engine.stats();
        assert_eq!(stats.cycles_completed, 1);
        assert_eq!(stats.records_pulled, 1);
        assert_eq!(stats.records_pushed, 1);
        assert_eq!(stats.last_sync_time, Some(Timestamp(1_010)));
    }

    #[test]
    fn aborted_cycle_records_the_error() {
        let (engine, remote, _) = engine();
        remote.fail_next(RemoteOp::FetchSince, RemoteError::transient("503"));

        let err = engine.sync(None).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(engine.state(), SyncState::Error);
        assert_eq!(engine.stats().cycles_failed, 1);
        assert!(engine.stats().last_error.unwrap().contains("503"));
    }

    #[test]
    fn try_sync_refuses_concurrent_cycles() {
        let (engine, _, _) = engine();
        let _held = engine.cycle.lock();
        assert!(matches!(
            engine.try_sync(None),
            Err(SyncError::AlreadyRunning { collection }) if collection == "docs"
        ));
    }

    #[test]
    fn cancel_flag() {
        let (engine, _, _) = engine();
        assert!(engine.check_cancelled().is_ok());
        engine.cancel();
        assert!(matches!(engine.check_cancelled(), Err(SyncError::Cancelled)));

        // A new cycle starts from a clean flag.
        engine.sync(None).unwrap();
        assert!(engine.check_cancelled().is_ok());
    }

    #[test]
    fn sync_with_retry_recovers_from_transient_errors() {
        let clock = Arc::new(ManualClock::new(Timestamp(1_000)));
        let remote = Arc::new(MemoryRemoteStore::with_clock(clock.clone()));
        let retry = crate::config::RetryConfig::new(3)
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
            .without_jitter();
        let engine = SyncEngine::new(
            SyncConfig::new("docs").with_retry(retry),
            MemoryLocalStore::<Doc>::new(),
            Arc::clone(&remote),
            MemorySyncCursor::new(),
        )
        .with_clock(clock);

        remote.fail_next(RemoteOp::FetchSince, RemoteError::transient("503"));
        remote.fail_next(RemoteOp::FetchSince, RemoteError::timeout("slow"));
        engine.sync_with_retry(None).unwrap();
        assert_eq!(engine.stats().retries, 2);
        assert_eq!(remote.calls(RemoteOp::FetchSince), 3);
    }

    #[test]
    fn sync_with_retry_gives_up_on_permanent_errors() {
        let (engine, remote, _) = engine();
        remote.fail_next(RemoteOp::FetchSince, RemoteError::permanent("401"));
        assert!(engine.sync_with_retry(None).is_err());
        assert_eq!(engine.stats().retries, 0);
    }

    #[test]
    fn clear_resets_local_state_and_cursor() {
        let (engine, remote, clock) = engine();
        remote.put(new_doc("a"));
        clock.advance(Duration::from_millis(5));
        engine.sync(None).unwrap();
        assert_eq!(engine.local().len().unwrap(), 1);

        engine.clear().unwrap();
        assert_eq!(engine.local().len().unwrap(), 0);

        // With the cursor forgotten, everything is pulled again.
        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pulled, 1);
    }

    #[test]
    fn resolver_results_are_rekeyed() {
        let (engine, remote, clock) = engine();
        let engine = engine.with_resolver(|local: &SyncRecord<Doc>, _: &Doc, at: Timestamp| {
            SyncRecord::clean("wrong", local.payload.clone(), at)
        });
        let saved = remote.put(new_doc("remote"));
        let id = saved.id.clone().unwrap();
        engine.local().upsert(SyncRecord::dirty(id.clone(), saved, Timestamp(1))).unwrap();
        clock.advance(Duration::from_millis(1));
        remote.put(Doc {
            text: "changed".into(),
            ..remote.get(&id).unwrap()
        });

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.conflicts_resolved, 1);
        assert!(engine.get("wrong").unwrap().is_none());
        let settled = engine.get(&id).unwrap().unwrap();
        assert!(!settled.dirty);
        assert_eq!(settled.payload.id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn edit_during_create_moves_to_server_id_and_stays_dirty() {
        let (engine, remote, _) = engine_over(InterleavedEdits::default());
        let client_id = engine.save_locally(new_doc("first")).unwrap();
        engine.local().edit_before_next_write(&client_id, "edited mid-push");

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(remote.get("S1").unwrap().text, "first");
        assert!(engine.get(&client_id).unwrap().is_none());

        let moved = engine.get("S1").unwrap().unwrap();
        assert!(moved.dirty);
        assert_eq!(moved.payload.text, "edited mid-push");
        assert_eq!(moved.payload.id.as_deref(), Some("S1"));
        assert_eq!(moved.payload.updated_at, remote.get("S1").unwrap().updated_at);

        // The kept edit goes out as an update of the same server record.
        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.conflicts_resolved, 0);
        assert_eq!(remote.calls(RemoteOp::Create), 1);
        assert_eq!(remote.get("S1").unwrap().text, "edited mid-push");
        assert!(!engine.get("S1").unwrap().unwrap().dirty);
    }

    #[test]
    fn edit_during_update_is_kept_for_the_next_push() {
        let (engine, remote, clock) = engine_over(InterleavedEdits::default());
        let id = remote.put(new_doc("v1")).id.unwrap();
        clock.advance(Duration::from_millis(1));
        engine.sync(None).unwrap();

        clock.advance(Duration::from_millis(1));
        let mut doc = engine.get(&id).unwrap().unwrap().payload;
        doc.text = "v2".into();
        engine.save_locally(doc).unwrap();
        engine.local().edit_before_next_write(&id, "v3");

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(remote.get(&id).unwrap().text, "v2");
        let kept = engine.get(&id).unwrap().unwrap();
        assert!(kept.dirty);
        assert_eq!(kept.payload.text, "v3");
        assert_eq!(kept.payload.updated_at, remote.get(&id).unwrap().updated_at);

        clock.advance(Duration::from_millis(1));
        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.conflicts_resolved, 0);
        assert_eq!(remote.get(&id).unwrap().text, "v3");
        assert!(!engine.get(&id).unwrap().unwrap().dirty);
    }

    #[test]
    fn edit_during_delete_keeps_the_record() {
        let (engine, remote, clock) = engine_over(InterleavedEdits::default());
        let id = remote.put(new_doc("doomed")).id.unwrap();
        clock.advance(Duration::from_millis(1));
        engine.sync(None).unwrap();

        engine.delete_locally(&id).unwrap();
        engine.local().edit_before_next_write(&id, "revived");
        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.deleted, 1);
        assert!(remote.get(&id).is_none());

        let kept = engine.get(&id).unwrap().unwrap();
        assert!(kept.dirty);
        assert!(!kept.deleted);
        assert_eq!(kept.payload.text, "revived");
    }

    #[test]
    fn kept_local_resolution_is_pushed_in_the_same_cycle() {
        let (engine, remote, clock) = engine();
        let engine = engine.with_resolver(crate::conflict::LastWriterWins);
        let id = remote.put(new_doc("v1")).id.unwrap();
        clock.advance(Duration::from_millis(1));
        engine.sync(None).unwrap();

        clock.advance(Duration::from_millis(1));
        remote.put(Doc {
            text: "remote edit".into(),
            ..remote.get(&id).unwrap()
        });
        clock.advance(Duration::from_millis(1));
        let mut doc = engine.get(&id).unwrap().unwrap().payload;
        doc.text = "newer local".into();
        engine.save_locally(doc).unwrap();
        clock.advance(Duration::from_millis(1));

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pulled, 1);
        assert_eq!(outcome.conflicts_resolved, 1);
        assert_eq!(outcome.pushed, 1);
        assert_eq!(remote.get(&id).unwrap().text, "newer local");
        let local = engine.get(&id).unwrap().unwrap();
        assert!(!local.dirty);
        assert_eq!(local.payload, remote.get(&id).unwrap());

        let outcome = engine.sync(None).unwrap();
        assert_eq!(outcome.pushed, 0);
        assert_eq!(outcome.conflicts_resolved, 0);
    }
}
