//! Registry for worker bodies
//!
//! Filled by the builder, then frozen behind an `Arc` when the router starts.

use std::collections::HashMap;
use std::sync::Arc;

use super::worker::Worker;

#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own name. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        if self.workers.insert(name.clone(), worker).is_some() {
            tracing::warn!(worker = %name, "worker re-registered, replacing previous body");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// List all registered worker names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.list())
            .finish()
    }
}
