//! Dependency/cycle tracker
//!
//! Keeps the append-only caller sets (which keys requested which) and rejects
//! a request whose target already sits, transitively, among the blocked
//! callers of the requester.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use super::tables::Tables;
use super::types::Key;
use crate::error::{Result, RouterError};

#[derive(Debug, Default)]
pub(crate) struct DependencyTracker {
    // target -> keys that requested it, in first-request order
    callers: Mutex<HashMap<Key, Vec<Key>>>,
}

impl DependencyTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check that `requester` may wait on `target`, then record the edge.
    ///
    /// The check and the append happen under one lock, so two requests racing
    /// on edges into the same target always see each other.
    pub(crate) fn link(&self, tables: &Tables, requester: &Key, target: &Key) -> Result<()> {
        let mut callers = self.callers.lock();

        let found = {
            let mut visited = HashSet::new();
            find_chain(&callers, tables, requester, target, &mut visited)
        };
        if let Some(mut chain) = found {
            chain.push(target.clone());
            return Err(RouterError::cycle(target, requester, chain));
        }

        let entry = callers.entry(target.clone()).or_default();
        if !entry.contains(requester) {
            tracing::trace!(%requester, %target, "recorded dependency");
            entry.push(requester.clone());
        }
        Ok(())
    }

    pub(crate) fn callers(&self, key: &Key) -> Vec<Key> {
        self.callers.lock().get(key).cloned().unwrap_or_default()
    }
}

/// Walk the caller sets backwards from `requester`. Returns the chain of keys
/// from `target` down to `requester` when `target` is reached.
///
/// Finished keys and keys that were never dispatched end the walk: neither
/// can be blocked in a cycle. `visited` only prunes ancestors reachable by
/// more than one path; the accepted graph is always acyclic.
fn find_chain<'a>(
    callers: &'a HashMap<Key, Vec<Key>>,
    tables: &Tables,
    requester: &'a Key,
    target: &Key,
    visited: &mut HashSet<&'a Key>,
) -> Option<Vec<Key>> {
    if requester == target {
        return Some(vec![requester.clone()]);
    }
    if !visited.insert(requester) {
        return None;
    }
    if tables.has_result(requester) || !tables.is_active(requester) {
        return None;
    }

    for dep in callers.get(requester)? {
        if let Some(mut chain) = find_chain(callers, tables, dep, target, visited) {
            chain.push(requester.clone());
            return Some(chain);
        }
    }
    None
}
