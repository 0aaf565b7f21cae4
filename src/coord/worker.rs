//! Worker bodies and the context they run with
//!
//! Workers never call each other directly. Every nested request goes back
//! through the router via [`WorkerCtx`], which is what records the dependency
//! edge and lets the result be shared.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;

use super::router::Router;
use super::types::Key;
use crate::error::Result;

/// Anything that can issue requests: the router itself (as the root
/// requester) or a running worker (as its own key).
pub trait Requester {
    fn router(&self) -> &Router;

    fn requester_key(&self) -> &Key;
}

/// Context for one running computation
#[derive(Clone)]
pub struct WorkerCtx {
    key: Key,
    router: Router,
}

impl WorkerCtx {
    pub(crate) fn new(key: Key, router: Router) -> Self {
        Self { key, router }
    }

    /// Key of the computation this context belongs to
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Decode this computation's arguments
    pub fn args<T: DeserializeOwned>(&self) -> Result<T> {
        self.key.args()
    }

    pub fn args_value(&self) -> Result<Value> {
        self.key.args_value()
    }

    /// Request another computation on behalf of this one
    pub async fn get<A>(&self, name: &str, args: &A) -> Result<Value>
    where
        A: Serialize + ?Sized,
    {
        self.router.get(&self.key, name, args).await
    }

    pub async fn get_as<T, A>(&self, name: &str, args: &A) -> Result<T>
    where
        T: DeserializeOwned,
        A: Serialize + ?Sized,
    {
        self.router.get_as(&self.key, name, args).await
    }
}

impl Requester for WorkerCtx {
    fn router(&self) -> &Router {
        &self.router
    }

    fn requester_key(&self) -> &Key {
        &self.key
    }
}

/// A computation body, registered under a unique name.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Compute the value for `ctx.key()`. Errors are memoized like values.
    async fn run(&self, ctx: &WorkerCtx) -> anyhow::Result<Value>;
}

type WorkerFn = Box<dyn Fn(WorkerCtx) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Worker backed by an async closure
pub struct FnWorker {
    name: String,
    func: WorkerFn,
}

impl FnWorker {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(WorkerCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(move |ctx| func(ctx).boxed()),
        }
    }
}

#[async_trait]
impl Worker for FnWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &WorkerCtx) -> anyhow::Result<Value> {
        (self.func)(ctx.clone()).await
    }
}
