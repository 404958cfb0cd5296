//! Live-update subscriptions over a local store.
//!
//! A [`Watch`] receives the full set of records matching its predicate:
//! once when it is created, and again after every committed mutation that
//! touches a matching record. Snapshots are delivered in commit order.
//!
//! # Usage
//!
//! ```rust,ignore
//! let watch = store.watch(Arc::new(|r: &SyncRecord<Note>| !r.deleted))?;
//!
//! std::thread::spawn(move || {
//!     for snapshot in watch {
//!         println!("{} records", snapshot.len());
//!     }
//! });
//! ```

use crate::record::{Record, SyncRecord};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// A shareable record filter.
pub type Predicate<R> = Arc<dyn Fn(&SyncRecord<R>) -> bool + Send + Sync>;

/// A stream of matching-set snapshots.
///
/// Dropping the watch unsubscribes it.
pub struct Watch<R> {
    rx: Receiver<Vec<SyncRecord<R>>>,
}

impl<R> Watch<R> {
    /// Blocks until the next snapshot arrives.
    ///
    /// Fails once the store has been dropped and all snapshots are drained.
    pub fn recv(&self) -> Result<Vec<SyncRecord<R>>, RecvError> {
        self.rx.recv()
    }

    /// Waits up to `timeout` for the next snapshot.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Vec<SyncRecord<R>>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Returns the next snapshot if one is queued.
    pub fn try_recv(&self) -> Result<Vec<SyncRecord<R>>, TryRecvError> {
        self.rx.try_recv()
    }

    /// Drains the queue and returns the newest snapshot, if any.
    pub fn latest(&self) -> Option<Vec<SyncRecord<R>>> {
        self.rx.try_iter().last()
    }
}

impl<R> Iterator for Watch<R> {
    type Item = Vec<SyncRecord<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

impl<R> std::fmt::Debug for Watch<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch").finish_non_exhaustive()
    }
}

struct Subscriber<R> {
    predicate: Predicate<R>,
    tx: Sender<Vec<SyncRecord<R>>>,
}

/// The set of live subscriptions of one store.
///
/// Callers hold the store's write lock around `subscribe` and `notify`.
pub(crate) struct WatchHub<R> {
    subscribers: Vec<Subscriber<R>>,
}

impl<R: Record> WatchHub<R> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    /// Registers a subscriber and sends it the current matching set.
    pub(crate) fn subscribe(
        &mut self,
        records: &BTreeMap<String, SyncRecord<R>>,
        predicate: Predicate<R>,
    ) -> Watch<R> {
        let (tx, rx) = mpsc::channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(snapshot(records, &predicate));
        self.subscribers.push(Subscriber { predicate, tx });
        Watch { rx }
    }

    /// Sends a fresh snapshot to every subscriber affected by a mutation.
    ///
    /// `touched` holds the old and new versions of the mutated records.
    /// When `cleared` is set every subscriber is notified.
    pub(crate) fn notify(
        &mut self,
        records: &BTreeMap<String, SyncRecord<R>>,
        touched: &[SyncRecord<R>],
        cleared: bool,
    ) {
        self.subscribers.retain(|sub| {
            let affected = cleared || touched.iter().any(|r| (sub.predicate)(r));
            if !affected {
                return true;
            }
            sub.tx.send(snapshot(records, &sub.predicate)).is_ok()
        });
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.len()
    }
}

fn snapshot<R: Record>(
    records: &BTreeMap<String, SyncRecord<R>>,
    predicate: &Predicate<R>,
) -> Vec<SyncRecord<R>> {
    records.values().filter(|r| predicate(r)).cloned().collect()
}
