//! Local record stores.
//!
//! Two implementations of [`LocalStore`] are provided:
//! - [`MemoryLocalStore`]: a map in memory, for tests and ephemeral replicas
//! - [`JournalLocalStore`]: a map in memory backed by an append-only journal

mod journal;
mod memory;
mod state;

pub use journal::{JournalLocalStore, JournalOptions};
pub use memory::MemoryLocalStore;

use crate::error::{CoreError, CoreResult};
use crate::record::{Record, SyncRecord};
use crate::watch::{Predicate, Watch};
use std::sync::Arc;

/// Persistent storage for synchronized records, keyed by id.
///
/// Every mutation is atomic: it either commits and is observed by all
/// watchers, or fails and leaves the store unchanged. Scans return records
/// in ascending id order.
pub trait LocalStore<R: Record>: Send + Sync {
    /// Inserts or replaces the record stored under `record.id`.
    fn upsert(&self, record: SyncRecord<R>) -> CoreResult<()>;

    /// Removes a record. Returns true if it existed.
    fn delete(&self, id: &str) -> CoreResult<bool>;

    /// Looks up a record by id.
    fn get(&self, id: &str) -> CoreResult<Option<SyncRecord<R>>>;

    /// Returns every record matching `predicate`.
    fn scan(&self, predicate: &dyn Fn(&SyncRecord<R>) -> bool) -> CoreResult<Vec<SyncRecord<R>>>;

    /// Subscribes to the set of records matching `predicate`.
    fn watch(&self, predicate: Predicate<R>) -> CoreResult<Watch<R>>;

    /// Removes every record.
    fn clear(&self) -> CoreResult<()>;

    /// Removes `old_id` and stores `record` as a single mutation.
    ///
    /// Used to move a record from its client id to its server id; readers
    /// never observe both keys or neither.
    fn replace(&self, old_id: &str, record: SyncRecord<R>) -> CoreResult<()>;

    /// Decides a change from the current version of the record under `id`
    /// and commits it, with no other mutation in between.
    ///
    /// `decide` runs under the store's write lock and must not call back
    /// into the store. Returns true if a mutation was committed.
    fn modify(
        &self,
        id: &str,
        decide: &mut dyn FnMut(Option<&SyncRecord<R>>) -> Change<R>,
    ) -> CoreResult<bool>;

    /// Returns the number of stored records.
    fn len(&self) -> CoreResult<usize>;

    /// Returns true if the store holds no records.
    fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl<R: Record, T: LocalStore<R> + ?Sized> LocalStore<R> for Arc<T> {
    fn upsert(&self, record: SyncRecord<R>) -> CoreResult<()> {
        (**self).upsert(record)
    }

    fn delete(&self, id: &str) -> CoreResult<bool> {
        (**self).delete(id)
    }

    fn get(&self, id: &str) -> CoreResult<Option<SyncRecord<R>>> {
        (**self).get(id)
    }

    fn scan(&self, predicate: &dyn Fn(&SyncRecord<R>) -> bool) -> CoreResult<Vec<SyncRecord<R>>> {
        (**self).scan(predicate)
    }

    fn watch(&self, predicate: Predicate<R>) -> CoreResult<Watch<R>> {
        (**self).watch(predicate)
    }

    fn clear(&self) -> CoreResult<()> {
        (**self).clear()
    }

    fn replace(&self, old_id: &str, record: SyncRecord<R>) -> CoreResult<()> {
        (**self).replace(old_id, record)
    }

    fn modify(
        &self,
        id: &str,
        decide: &mut dyn FnMut(Option<&SyncRecord<R>>) -> Change<R>,
    ) -> CoreResult<bool> {
        (**self).modify(id, decide)
    }

    fn len(&self) -> CoreResult<usize> {
        (**self).len()
    }
}

/// The outcome of [`LocalStore::modify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<R> {
    /// Leave the store as it is.
    Keep,
    /// Store the record. If it is keyed differently from the inspected
    /// record, the inspected one is removed in the same mutation.
    Put(SyncRecord<R>),
    /// Remove the inspected record.
    Remove,
}

/// A single committed change to a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation<R> {
    Upsert(SyncRecord<R>),
    Delete(String),
    Replace {
        old_id: String,
        record: SyncRecord<R>,
    },
    Clear,
}

impl<R: Record> Mutation<R> {
    /// Turns the change decided for `id` into a mutation, or `None` if it
    /// would change nothing.
    pub(crate) fn from_change(id: &str, change: Change<R>, exists: bool) -> Option<Self> {
        match change {
            Change::Keep => None,
            Change::Remove if !exists => None,
            Change::Remove => Some(Self::Delete(id.to_string())),
            Change::Put(record) if record.id == id => Some(Self::Upsert(record)),
            Change::Put(record) => Some(Self::Replace {
                old_id: id.to_string(),
                record,
            }),
        }
    }

    /// Checks the record invariants before anything is written.
    pub(crate) fn validate(&self) -> CoreResult<()> {
        match self {
            Self::Upsert(record) => validate_record(record),
            Self::Replace { old_id, record } => {
                if old_id.is_empty() {
                    return Err(CoreError::invalid_record("replaced id is empty"));
                }
                validate_record(record)
            }
            Self::Delete(_) | Self::Clear => Ok(()),
        }
    }
}

fn validate_record<R>(record: &SyncRecord<R>) -> CoreResult<()> {
    if record.id.is_empty() {
        return Err(CoreError::invalid_record("record id is empty"));
    }
    if record.deleted && !record.dirty {
        return Err(CoreError::invalid_record(format!(
            "tombstone '{}' must be dirty",
            record.id
        )));
    }
    Ok(())
}
