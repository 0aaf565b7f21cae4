// Lets the `#[worker]` expansion refer to `::memo_router` from inside this crate
extern crate self as memo_router;

pub mod config;
pub mod coord;
pub mod error;

pub use config::RouterConfig;
pub use coord::{
    encode, FnWorker, Key, Outcome, Requester, Router, RouterBuilder, RouterStats, Worker,
    WorkerCtx, WorkerRegistry,
};
pub use error::{Result, RouterError};
pub use memo_router_macros::worker;

// Re-exported for code generated by `#[worker]`
pub use anyhow;
pub use async_trait::async_trait;
pub use serde_json::Value;
