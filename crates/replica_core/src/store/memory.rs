//! In-memory local store.

use super::state::StoreState;
use super::{Change, LocalStore, Mutation};
use crate::error::CoreResult;
use crate::record::{Record, SyncRecord};
use crate::watch::{Predicate, Watch};
use parking_lot::RwLock;

/// A [`LocalStore`] that keeps records in memory only.
///
/// Contents are lost when the store is dropped.
pub struct MemoryLocalStore<R> {
    state: RwLock<StoreState<R>>,
}

impl<R: Record> MemoryLocalStore<R> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::new()),
        }
    }

    fn mutate(&self, mutation: Mutation<R>) -> CoreResult<bool> {
        mutation.validate()?;
        Ok(self.state.write().apply(mutation))
    }
}

impl<R: Record> Default for MemoryLocalStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> LocalStore<R> for MemoryLocalStore<R> {
    fn upsert(&self, record: SyncRecord<R>) -> CoreResult<()> {
        self.mutate(Mutation::Upsert(record)).map(|_| ())
    }

    fn delete(&self, id: &str) -> CoreResult<bool> {
        self.mutate(Mutation::Delete(id.to_string()))
    }

    fn get(&self, id: &str) -> CoreResult<Option<SyncRecord<R>>> {
        Ok(self.state.read().get(id))
    }

    fn scan(&self, predicate: &dyn Fn(&SyncRecord<R>) -> bool) -> CoreResult<Vec<SyncRecord<R>>> {
        Ok(self.state.read().scan(predicate))
    }

    fn watch(&self, predicate: Predicate<R>) -> CoreResult<Watch<R>> {
        Ok(self.state.write().subscribe(predicate))
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
        let mut state = self.state.write();
        let change = decide(state.peek(id));
        let Some(mutation) = Mutation::from_change(id, change, state.contains(id)) else {
            return Ok(false);
        };
        mutation.validate()?;
        Ok(state.apply(mutation))
    }

    fn len(&self) -> CoreResult<usize> {
        Ok(self.state.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{item, Item};
    use crate::types::Timestamp;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn dirty(id: &str, body: &str) -> SyncRecord<Item> {
        SyncRecord::dirty(id, item(id, body), Timestamp(1))
    }

    #[test]
    fn upsert_get_delete() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("S1", "a")).unwrap();
        assert_eq!(store.get("S1").unwrap().unwrap().payload.body, "a");

        store.upsert(dirty("S1", "b")).unwrap();
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.get("S1").unwrap().unwrap().payload.body, "b");

        assert!(store.delete("S1").unwrap());
        assert!(!store.delete("S1").unwrap());
        assert!(store.get("S1").unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn scan_is_ordered_by_id() {
        let store = MemoryLocalStore::new();
        for id in ["c", "a", "b"] {
            store.upsert(dirty(id, id)).unwrap();
        }
        let ids: Vec<_> = store
            .scan(&|_| true)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn invalid_upsert_leaves_store_unchanged() {
        let store = MemoryLocalStore::new();
        let watch = store.watch(Arc::new(|_: &SyncRecord<Item>| true)).unwrap();
        watch.latest();

        assert!(store.upsert(dirty("", "a")).is_err());
        assert_eq!(store.len().unwrap(), 0);
        assert!(watch.try_recv().is_err());
    }

    #[test]
    fn watch_follows_mutations_in_order() {
        let store = Arc::new(MemoryLocalStore::new());
        let watch = store
            .watch(Arc::new(|r: &SyncRecord<Item>| r.dirty))
            .unwrap();

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..10 {
                    store.upsert(dirty(&format!("S{i}"), "x")).unwrap();
                }
            })
        };
        writer.join().unwrap();

        let sizes: Vec<usize> = (0..11)
            .map(|_| watch.recv_timeout(Duration::from_secs(1)).unwrap().len())
            .collect();
        assert_eq!(sizes, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn watch_sees_records_leaving_the_match_set() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("S1", "a")).unwrap();
        let watch = store
            .watch(Arc::new(|r: &SyncRecord<Item>| r.dirty))
            .unwrap();
        assert_eq!(watch.try_recv().unwrap().len(), 1);

        store
            .upsert(SyncRecord::clean("S1", item("S1", "a"), Timestamp(2)))
            .unwrap();
        assert!(watch.try_recv().unwrap().is_empty());
    }

    #[test]
    fn replace_is_a_single_notification() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("local_1", "a")).unwrap();
        let watch = store.watch(Arc::new(|_: &SyncRecord<Item>| true)).unwrap();
        watch.latest();

        store
            .replace(
                "local_1",
                SyncRecord::clean("S1", item("S1", "a"), Timestamp(2)),
            )
            .unwrap();

        let snapshot = watch.try_recv().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, "S1");
        assert!(watch.try_recv().is_err());
    }

    #[test]
    fn modify_sees_the_committed_version() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("local_1", "a")).unwrap();

        let mut seen = None;
        let changed = store
            .modify("local_1", &mut |current| {
                seen = current.map(|r| r.payload.body.clone());
                Change::Put(SyncRecord::clean("S1", item("S1", "a"), Timestamp(2)))
            })
            .unwrap();

        assert!(changed);
        assert_eq!(seen.as_deref(), Some("a"));
        assert!(store.get("local_1").unwrap().is_none());
        assert!(!store.get("S1").unwrap().unwrap().dirty);
    }

    #[test]
    fn modify_keep_and_missing_remove_write_nothing() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("S1", "a")).unwrap();
        let watch = store.watch(Arc::new(|_: &SyncRecord<Item>| true)).unwrap();
        watch.latest();

        assert!(!store.modify("S1", &mut |_| Change::Keep).unwrap());
        assert!(!store.modify("S9", &mut |_| Change::Remove).unwrap());
        assert!(watch.try_recv().is_err());

        assert!(store.modify("S1", &mut |_| Change::Remove).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn invalid_modify_leaves_store_unchanged() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("S1", "a")).unwrap();

        let mut tombstone = SyncRecord::clean("S1", item("S1", "b"), Timestamp(2));
        tombstone.deleted = true;
        assert!(store
            .modify("S1", &mut |_| Change::Put(tombstone.clone()))
            .is_err());
        assert_eq!(store.get("S1").unwrap().unwrap().payload.body, "a");
    }

    #[test]
    fn clear_empties_the_store() {
        let store = MemoryLocalStore::new();
        store.upsert(dirty("S1", "a")).unwrap();
        store.upsert(dirty("S2", "b")).unwrap();
        store.clear().unwrap();
        assert_eq!(store.len().unwrap(), 0);
    }
}
