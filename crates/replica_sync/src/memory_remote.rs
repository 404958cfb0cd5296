//! In-memory authoritative remote store.
//!
//! Behaves like a small document backend: it assigns server ids, stamps
//! modification times, rejects stale updates, and can be scripted to fail.
//! Used by tests and demos in place of a real server.

use crate::remote::{
    check_deadline, DeleteOutcome, FetchRequest, RemoteError, RemoteResult, RemoteStore,
};
use parking_lot::Mutex;
use replica_core::{is_client_id, Clock, Record, SystemClock, Timestamp};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A remote store operation, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// [`RemoteStore::fetch_since`].
    FetchSince,
    /// [`RemoteStore::fetch_one`].
    FetchOne,
    /// [`RemoteStore::create`].
    Create,
    /// [`RemoteStore::update`].
    Update,
    /// [`RemoteStore::delete`].
    Delete,
}

/// Filter type of [`MemoryRemoteStore`].
pub struct RecordFilter<R>(Arc<dyn Fn(&R) -> bool + Send + Sync>);

impl<R> RecordFilter<R> {
    /// Wraps a predicate.
    pub fn new(predicate: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Returns true if `record` passes the filter.
    pub fn matches(&self, record: &R) -> bool {
        (self.0)(record)
    }
}

impl<R> Clone for RecordFilter<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<R> fmt::Debug for RecordFilter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordFilter").finish()
    }
}

struct Stored<R> {
    record: R,
    modified_at: Timestamp,
    version: u64,
}

struct Inner<R> {
    records: BTreeMap<String, Stored<R>>,
    next_id: u64,
}

/// An in-memory [`RemoteStore`].
pub struct MemoryRemoteStore<R> {
    inner: Mutex<Inner<R>>,
    clock: Arc<dyn Clock>,
    conflict_detection: bool,
    latency: Mutex<Duration>,
    failures: Mutex<HashMap<RemoteOp, VecDeque<RemoteError>>>,
    calls: Mutex<HashMap<RemoteOp, usize>>,
}

impl<R: Record> MemoryRemoteStore<R> {
    /// Creates an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store that stamps writes with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                records: BTreeMap::new(),
                next_id: 1,
            }),
            clock,
            conflict_detection: true,
            latency: Mutex::new(Duration::ZERO),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Enables or disables stale-update detection.
    ///
    /// When enabled, an update whose [`Record::updated_at`] is older than
    /// the stored modification time fails with a conflict.
    #[must_use]
    pub fn with_conflict_detection(mut self, enabled: bool) -> Self {
        self.conflict_detection = enabled;
        self
    }

    /// Delays every call by `latency` before checking its deadline.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Makes the next call of `op` fail with `error`.
    ///
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.failures.lock().entry(op).or_default().push_back(error);
    }

    /// Returns how many times `op` was called.
    pub fn calls(&self, op: RemoteOp) -> usize {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    /// Writes a record as another client would, bypassing failure injection.
    ///
    /// A record without an id gets a fresh server id. Returns the stored copy.
    pub fn put(&self, mut record: R) -> R {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let id = match record.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => next_server_id(&mut inner),
        };
        record.set_id(Some(id.clone()));
        record.set_updated_at(now);
        store(&mut inner, id, record.clone(), now);
        record
    }

    /// Removes a record as another client would.
    pub fn remove(&self, id: &str) -> Option<R> {
        self.inner.lock().records.remove(id).map(|s| s.record)
    }

    /// Returns the stored copy of a record.
    pub fn get(&self, id: &str) -> Option<R> {
        self.inner.lock().records.get(id).map(|s| s.record.clone())
    }

    /// Returns the stored version of a record; it starts at 1.
    pub fn version(&self, id: &str) -> Option<u64> {
        self.inner.lock().records.get(id).map(|s| s.version)
    }

    /// Returns every stored record, ordered by id.
    pub fn records(&self) -> Vec<R> {
        self.inner
            .lock()
            .records
            .values()
            .map(|s| s.record.clone())
            .collect()
    }

    /// Returns the number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts the call, simulates latency, and applies scripted failures.
    fn enter(&self, op: RemoteOp, deadline: Option<Instant>) -> RemoteResult<()> {
        *self.calls.lock().entry(op).or_default() += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            thread::sleep(latency);
        }
        check_deadline(deadline, &format!("{op:?}"))?;

        if let Some(error) = self
            .failures
            .lock()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(())
    }
}

impl<R: Record> Default for MemoryRemoteStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn next_server_id<R>(inner: &mut Inner<R>) -> String {
    let id = format!("S{}", inner.next_id);
    inner.next_id += 1;
    id
}

fn store<R>(inner: &mut Inner<R>, id: String, record: R, now: Timestamp) {
    let version = inner.records.get(&id).map_or(1, |s| s.version + 1);
    inner.records.insert(
        id,
        Stored {
            record,
            modified_at: now,
            version,
        },
    );
}

impl<R: Record> RemoteStore<R> for MemoryRemoteStore<R> {
    type Filter = RecordFilter<R>;

    fn fetch_since(
        &self,
        request: &FetchRequest<Self::Filter>,
        deadline: Option<Instant>,
    ) -> RemoteResult<Vec<R>> {
        self.enter(RemoteOp::FetchSince, deadline)?;
        let inner = self.inner.lock();

        let mut changed: Vec<(&String, &Stored<R>)> = inner
            .records
            .iter()
            .filter(|(_, s)| s.modified_at > request.since)
            .filter(|(_, s)| request.filter.as_ref().map_or(true, |f| f.matches(&s.record)))
            .collect();
        changed.sort_by(|a, b| a.1.modified_at.cmp(&b.1.modified_at).then(a.0.cmp(b.0)));

        Ok(changed
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .map(|(_, s)| s.record.clone())
            .collect())
    }

    fn fetch_one(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<Option<R>> {
        self.enter(RemoteOp::FetchOne, deadline)?;
        Ok(self.get(id))
    }

    fn create(&self, mut record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        self.enter(RemoteOp::Create, deadline)?;
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let id = next_server_id(&mut inner);
        record.set_id(Some(id.clone()));
        record.set_updated_at(now);
        store(&mut inner, id, record.clone(), now);
        Ok(record)
    }

    fn update(&self, mut record: R, deadline: Option<Instant>) -> RemoteResult<R> {
        self.enter(RemoteOp::Update, deadline)?;
        let id = match record.id() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(RemoteError::permanent("update without an id")),
        };
        if is_client_id(&id) {
            return Err(RemoteError::permanent(format!(
                "'{id}' is a client id, not a server id"
            )));
        }

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let Some(current) = inner.records.get(&id) else {
            return Err(RemoteError::not_found(format!("no record '{id}'")));
        };
        if self.conflict_detection {
            if let Some(seen) = record.updated_at() {
                if seen < current.modified_at {
                    return Err(RemoteError::conflict(format!(
                        "'{id}' was modified at {} after {seen}",
                        current.modified_at
                    )));
                }
            }
        }

        record.set_updated_at(now);
        store(&mut inner, id, record.clone(), now);
        Ok(record)
    }

    fn delete(&self, id: &str, deadline: Option<Instant>) -> RemoteResult<DeleteOutcome> {
        self.enter(RemoteOp::Delete, deadline)?;
        match self.inner.lock().records.remove(id) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }
}
