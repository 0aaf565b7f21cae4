//! Memoization table and active markers.
//!
//! Readable from any task; only the coordinator writes to them.

use dashmap::{DashMap, DashSet};

use super::types::{Key, Outcome};

#[derive(Debug, Default)]
pub(crate) struct Tables {
    results: DashMap<Key, Outcome>,
    active: DashSet<Key>,
}

impl Tables {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Outcome> {
        self.results.get(key).map(|entry| entry.value().clone())
    }

    pub(crate) fn has_result(&self, key: &Key) -> bool {
        self.results.contains_key(key)
    }

    /// Store a result unless one is already present. Returns false on a
    /// duplicate.
    pub(crate) fn store(&self, key: Key, outcome: Outcome) -> bool {
        match self.results.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(outcome);
                true
            }
        }
    }

    pub(crate) fn is_active(&self, key: &Key) -> bool {
        self.active.contains(key)
    }

    /// Set the active marker. Returns false if it was already set.
    pub(crate) fn mark_active(&self, key: &Key) -> bool {
        self.active.insert(key.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.results.len()
    }

    pub(crate) fn snapshot(&self) -> Vec<(Key, Outcome)> {
        let mut entries: Vec<_> = self
            .results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}
