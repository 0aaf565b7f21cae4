//! Public handle and builder
//!
//! `RouterBuilder` collects worker registrations, then `start` freezes the
//! registry and spawns the coordinator. `Router` is a cheap clonable handle
//! shared by callers and running workers.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::coordinator::Coordinator;
use super::registry::WorkerRegistry;
use super::stats::{RouterCounters, RouterStats};
use super::tables::Tables;
use super::tracker::DependencyTracker;
use super::types::{Key, Outcome, RouterEvent};
use super::worker::{FnWorker, Requester, Worker, WorkerCtx};
use crate::config::RouterConfig;
use crate::error::{Result, RouterError};

pub(crate) struct Shared {
    config: RouterConfig,
    events: mpsc::Sender<RouterEvent>,
    registry: WorkerRegistry,
    tables: Arc<Tables>,
    tracker: DependencyTracker,
    stats: Arc<RouterCounters>,
    root: Key,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Builder collecting workers before the router starts
#[derive(Debug, Default)]
pub struct RouterBuilder {
    config: RouterConfig,
    registry: WorkerRegistry,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<W: Worker + 'static>(self, worker: W) -> Self {
        self.register_arc(Arc::new(worker))
    }

    pub fn register_arc(mut self, worker: Arc<dyn Worker>) -> Self {
        self.registry.register(worker);
        self
    }

    /// Register an async closure as the body for `name`
    pub fn register_fn<F, Fut>(self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(WorkerCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(FnWorker::new(name, func))
    }

    /// Spawn the coordinator on the current tokio runtime.
    pub fn start(self) -> Result<Router> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            RouterError::configuration(format!("router must start inside a tokio runtime: {}", e))
        })?;

        let (events_tx, events_rx) = mpsc::channel(self.config.event_capacity);
        let tables = Arc::new(Tables::new());
        let stats = Arc::new(RouterCounters::default());
        let span = tracing::info_span!("router", name = %self.config.name);

        let shared = Arc::new(Shared {
            config: self.config,
            events: events_tx,
            registry: self.registry,
            tables: tables.clone(),
            tracker: DependencyTracker::new(),
            stats: stats.clone(),
            root: Key::root(),
            task: parking_lot::Mutex::new(None),
        });

        let coordinator = Coordinator::new(events_rx, Arc::downgrade(&shared), tables, stats);
        let handle = runtime.spawn(coordinator.run().instrument(span));
        *shared.task.lock() = Some(handle);

        Ok(Router { shared })
    }
}

/// Handle to a running memoizing router
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub(crate) fn worker(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.shared.registry.get(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &RouterConfig {
        &self.shared.config
    }

    pub fn workers(&self) -> Vec<String> {
        self.shared.registry.list()
    }

    /// Request `name(args)` on behalf of `requester` and wait for the result.
    ///
    /// Runs the cycle check first; a rejected request returns immediately and
    /// is not memoized.
    pub async fn get<A>(&self, requester: &Key, name: &str, args: &A) -> Result<Value>
    where
        A: Serialize + ?Sized,
    {
        let target = Key::new(name, args)?;
        self.get_key(requester, target).await
    }

    pub async fn get_key(&self, requester: &Key, target: Key) -> Result<Value> {
        if let Err(err) = self.shared.tracker.link(&self.shared.tables, requester, &target) {
            RouterCounters::incr(&self.shared.stats.cycles_rejected);
            tracing::debug!(%requester, %target, "rejected cyclic request");
            return Err(err);
        }

        let (reply, response) = oneshot::channel();
        let event = RouterEvent::Request {
            key: target.clone(),
            reply,
        };
        if self.shared.events.send(event).await.is_err() {
            return Err(RouterError::shutdown(&target));
        }
        response
            .await
            .map_err(|_| RouterError::shutdown(&target))?
    }

    /// Like [`Router::get`], decoding the value into `T`
    pub async fn get_as<T, A>(&self, requester: &Key, name: &str, args: &A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        let target = Key::new(name, args)?;
        let value = self.get_key(requester, target.clone()).await?;
        serde_json::from_value(value).map_err(|e| RouterError::encoding_for(&target, e))
    }

    /// Top-level request, made by the root requester
    pub async fn request<A>(&self, name: &str, args: &A) -> Result<Value>
    where
        A: Serialize + ?Sized,
    {
        self.get(&self.shared.root, name, args).await
    }

    pub async fn request_as<T, A>(&self, name: &str, args: &A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        self.get_as(&self.shared.root, name, args).await
    }

    /// Store a result for `name(args)` without running a worker.
    ///
    /// Goes through the coordinator like any completion, so a key that
    /// already has a result keeps it.
    pub async fn seed<A, T>(&self, name: &str, args: &A, value: &T) -> Result<()>
    where
        A: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        let key = Key::new(name, args)?;
        let value = crate::coord::types::encode(name, value)?;
        let event = RouterEvent::Complete {
            key: key.clone(),
            outcome: Ok(value),
        };
        self.shared
            .events
            .send(event)
            .await
            .map_err(|_| RouterError::shutdown(&key))
    }

    pub(crate) async fn complete(&self, key: Key, outcome: Outcome) {
        let event = RouterEvent::Complete { key, outcome };
        if let Err(mpsc::error::SendError(event)) = self.shared.events.send(event).await {
            if let RouterEvent::Complete { key, .. } = event {
                tracing::debug!(%key, "router stopped before completion was recorded");
            }
        }
    }

    /// Stop the coordinator and wait for it to exit.
    ///
    /// Requests still waiting, and any made afterwards, fail with
    /// `RouterError::Shutdown`.
    pub async fn stop(&self) {
        // a send error means the loop is already gone
        let _ = self.shared.events.send(RouterEvent::Stop).await;

        let handle = self.shared.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("coordinator task ended abnormally: {}", e);
            }
        }
    }

    /// Stored outcome for a key, if it has completed
    pub fn cached(&self, key: &Key) -> Option<Outcome> {
        self.shared.tables.get(key)
    }

    /// Every stored (key, outcome) pair, ordered by key
    pub fn snapshot(&self) -> Vec<(Key, Outcome)> {
        self.shared.tables.snapshot()
    }

    pub fn cached_len(&self) -> usize {
        self.shared.tables.len()
    }

    /// Keys that have requested `key` so far
    pub fn callers(&self, key: &Key) -> Vec<Key> {
        self.shared.tracker.callers(key)
    }

    pub fn stats(&self) -> RouterStats {
        self.shared.stats.snapshot()
    }
}

impl Requester for Router {
    fn router(&self) -> &Router {
        self
    }

    fn requester_key(&self) -> &Key {
        &self.shared.root
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("name", &self.shared.config.name)
            .field("workers", &self.shared.registry.list())
            .field("cached", &self.shared.tables.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_outside_runtime_fails() {
        let err = Router::builder().start().unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = RouterConfig::new("bad").with_event_capacity(0);
        assert!(Router::builder().with_config(config).start().is_err());
    }

    #[tokio::test]
    async fn test_seeded_value_is_served_without_dispatch() {
        let router = Router::builder()
            .register_fn("answer", |_ctx| async { Ok(json!(0)) })
            .start()
            .unwrap();

        router.seed("answer", &(), &42).await.unwrap();
        let value = router.request("answer", &()).await.unwrap();
        assert_eq!(value, json!(42));

        let stats = router.stats();
        assert_eq!(stats.dispatches, 0);
        assert_eq!(stats.hits, 1);
        router.stop().await;
    }

    #[tokio::test]
    async fn test_requests_after_stop_fail() {
        let router = Router::builder()
            .register_fn("one", |_ctx| async { Ok(json!(1)) })
            .start()
            .unwrap();
        assert_eq!(router.request("one", &()).await.unwrap(), json!(1));

        router.stop().await;
        let err = router.request("one", &()).await.unwrap_err();
        assert!(matches!(err, RouterError::Shutdown { .. }));
        // stopping twice is harmless
        router.stop().await;
    }
}
