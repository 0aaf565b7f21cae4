use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated without touching the coordinator
#[derive(Debug, Default)]
pub(crate) struct RouterCounters {
    pub(crate) requests: AtomicU64,
    pub(crate) hits: AtomicU64,
    pub(crate) dispatches: AtomicU64,
    pub(crate) completions: AtomicU64,
    pub(crate) cycles_rejected: AtomicU64,
    pub(crate) unregistered: AtomicU64,
}

impl RouterCounters {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> RouterStats {
        RouterStats {
            requests: self.requests.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            cycles_rejected: self.cycles_rejected.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
        }
    }
}

/// Router statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Requests that reached the coordinator
    pub requests: u64,
    /// Requests answered straight from the memoization table
    pub hits: u64,
    /// Keys handed to a worker (or to the unregistered path)
    pub dispatches: u64,
    /// Results stored, including seeded ones
    pub completions: u64,
    pub cycles_rejected: u64,
    pub unregistered: u64,
}

impl RouterStats {
    pub fn hit_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }
}
