//! In-memory index shared by the store implementations.

use super::Mutation;
use crate::record::{Record, SyncRecord};
use crate::watch::{Predicate, Watch, WatchHub};
use std::collections::BTreeMap;

/// Records keyed by id plus their subscribers.
pub(crate) struct StoreState<R> {
    records: BTreeMap<String, SyncRecord<R>>,
    hub: WatchHub<R>,
}

impl<R: Record> StoreState<R> {
    pub(crate) fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            hub: WatchHub::new(),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<SyncRecord<R>> {
        self.records.get(id).cloned()
    }

    pub(crate) fn peek(&self, id: &str) -> Option<&SyncRecord<R>> {
        self.records.get(id)
    }

    pub(crate) fn scan(&self, predicate: &dyn Fn(&SyncRecord<R>) -> bool) -> Vec<SyncRecord<R>> {
        self.records
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &SyncRecord<R>> {
        self.records.values()
    }

    pub(crate) fn subscribe(&mut self, predicate: Predicate<R>) -> Watch<R> {
        self.hub.subscribe(&self.records, predicate)
    }

    /// Applies a validated mutation and notifies watchers.
    ///
    /// Returns false if the mutation changed nothing.
    pub(crate) fn apply(&mut self, mutation: Mutation<R>) -> bool {
        let cleared = matches!(mutation, Mutation::Clear);
        match self.commit(mutation) {
            Some(touched) => {
                self.hub.notify(&self.records, &touched, cleared);
                true
            }
            None => false,
        }
    }

    /// Applies a mutation without notifying anyone. Used during replay.
    pub(crate) fn apply_silently(&mut self, mutation: Mutation<R>) -> bool {
        self.commit(mutation).is_some()
    }

    /// Performs the mutation and returns the old and new versions of every
    /// record it touched, or `None` if nothing changed.
    fn commit(&mut self, mutation: Mutation<R>) -> Option<Vec<SyncRecord<R>>> {
        match mutation {
            Mutation::Upsert(record) => {
                let mut touched = vec![record.clone()];
                touched.extend(self.records.insert(record.id.clone(), record));
                Some(touched)
            }
            Mutation::Delete(id) => self.records.remove(&id).map(|old| vec![old]),
            Mutation::Replace { old_id, record } => {
                let mut touched = vec![record.clone()];
                touched.extend(self.records.remove(&old_id));
                touched.extend(self.records.insert(record.id.clone(), record));
                Some(touched)
            }
            Mutation::Clear => {
                if self.records.is_empty() {
                    return None;
                }
                Some(std::mem::take(&mut self.records).into_values().collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{item, Item};
    use crate::types::Timestamp;
    use std::sync::Arc;

    fn clean(id: &str) -> SyncRecord<Item> {
        SyncRecord::clean(id, item(id, "x"), Timestamp(1))
    }

    #[test]
    fn delete_notifies_watchers_of_the_old_version() {
        let mut state = StoreState::new();
        state.apply(Mutation::Upsert(clean("S1")));
        let watch = state.subscribe(Arc::new(|r: &SyncRecord<Item>| r.id == "S1"));
        assert_eq!(watch.try_recv().unwrap().len(), 1);

        assert!(state.apply(Mutation::Delete("S1".into())));
        assert!(watch.try_recv().unwrap().is_empty());
    }

    #[test]
    fn missing_delete_changes_nothing() {
        let mut state: StoreState<Item> = StoreState::new();
        let watch = state.subscribe(Arc::new(|_: &SyncRecord<Item>| true));
        watch.latest();

        assert!(!state.apply(Mutation::Delete("nope".into())));
        assert!(watch.try_recv().is_err());
    }

    #[test]
    fn replace_moves_the_key() {
        let mut state = StoreState::new();
        state.apply(Mutation::Upsert(clean("local_1")));
        state.apply(Mutation::Replace {
            old_id: "local_1".into(),
            record: clean("S1"),
        });

        assert!(!state.contains("local_1"));
        assert!(state.contains("S1"));
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn clearing_an_empty_state_is_a_no_op() {
        let mut state: StoreState<Item> = StoreState::new();
        assert!(!state.apply(Mutation::Clear));
        state.apply(Mutation::Upsert(clean("S1")));
        assert!(state.apply(Mutation::Clear));
        assert_eq!(state.len(), 0);
    }
}
