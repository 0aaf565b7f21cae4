//! Coordinator - the single event loop that owns all memoization state
//!
//! Requests and completions arrive on one channel and are applied one at a
//! time. Worker bodies run on their own tasks and report back through the
//! same channel, so no lock is ever held while user code runs.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::router::{Router, Shared};
use super::stats::RouterCounters;
use super::tables::Tables;
use super::types::{Key, Outcome, RouterEvent};
use super::worker::{Worker, WorkerCtx};
use crate::error::RouterError;

pub(crate) struct Coordinator {
    events: mpsc::Receiver<RouterEvent>,
    // Weak so that dropping every Router handle closes the event channel
    shared: Weak<Shared>,
    tables: Arc<Tables>,
    stats: Arc<RouterCounters>,
    waiters: HashMap<Key, Vec<oneshot::Sender<Outcome>>>,
}

impl Coordinator {
    pub(crate) fn new(
        events: mpsc::Receiver<RouterEvent>,
        shared: Weak<Shared>,
        tables: Arc<Tables>,
        stats: Arc<RouterCounters>,
    ) -> Self {
        Self {
            events,
            shared,
            tables,
            stats,
            waiters: HashMap::new(),
        }
    }

    /// Process events until `Stop` arrives or every sender is gone.
    ///
    /// Waiters still pending at exit are dropped, which their `get` calls
    /// observe as `RouterError::Shutdown`.
    pub(crate) async fn run(mut self) {
        info!("coordinator started");

        while let Some(event) = self.events.recv().await {
            match event {
                RouterEvent::Request { key, reply } => self.on_request(key, reply),
                RouterEvent::Complete { key, outcome } => self.on_complete(key, outcome),
                RouterEvent::Stop => {
                    info!("coordinator received stop");
                    break;
                }
            }
        }

        let pending: usize = self.waiters.values().map(Vec::len).sum();
        info!(pending, cached = self.tables.len(), "coordinator stopped");
    }

    fn on_request(&mut self, key: Key, reply: oneshot::Sender<Outcome>) {
        RouterCounters::incr(&self.stats.requests);

        if let Some(outcome) = self.tables.get(&key) {
            trace!(%key, "cache hit");
            RouterCounters::incr(&self.stats.hits);
            let _ = reply.send(outcome);
            return;
        }

        self.waiters.entry(key.clone()).or_default().push(reply);

        if self.tables.mark_active(&key) {
            self.dispatch(key);
        } else {
            trace!(%key, "already running, queued waiter");
        }
    }

    fn on_complete(&mut self, key: Key, outcome: Outcome) {
        if !self.tables.store(key.clone(), outcome.clone()) {
            warn!(%key, "ignoring second completion for a stored key");
            return;
        }
        RouterCounters::incr(&self.stats.completions);

        let waiters = self.waiters.remove(&key).unwrap_or_default();
        debug!(%key, ok = outcome.is_ok(), waiters = waiters.len(), "completed");
        for waiter in waiters {
            // a dropped receiver just means that caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
    }

    fn dispatch(&self, key: Key) {
        let Some(shared) = self.shared.upgrade() else {
            debug!(%key, "no router handles left, not dispatching");
            return;
        };
        let router = Router::from_shared(shared);
        RouterCounters::incr(&self.stats.dispatches);

        match router.worker(key.name()) {
            Some(worker) => {
                debug!(%key, "dispatching");
                tokio::spawn(run_worker(worker, key, router));
            }
            None => {
                debug!(%key, "no worker registered");
                RouterCounters::incr(&self.stats.unregistered);
                // completion still goes through the event loop
                tokio::spawn(async move {
                    let outcome = Err(RouterError::unregistered(&key));
                    router.complete(key, outcome).await;
                });
            }
        }
    }
}

async fn run_worker(worker: Arc<dyn Worker>, key: Key, router: Router) {
    let ctx = WorkerCtx::new(key.clone(), router.clone());

    let outcome = match AssertUnwindSafe(worker.run(&ctx)).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(RouterError::from_worker(&key, err)),
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "worker panicked".to_string());
            warn!(%key, %message, "worker panicked");
            Err(RouterError::computation(&key, format!("panicked: {}", message)))
        }
    };

    drop(ctx);
    router.complete(key, outcome).await;
}
