//! Memoizing request router
//!
//! One coordinator task owns the memoization table, the waiter lists and
//! the active markers. Callers go through the dependency tracker first, so a
//! request that would wait on itself is rejected before it can deadlock.

pub mod types;
mod coordinator;
pub mod registry;
pub mod router;
pub mod stats;
mod tables;
mod tracker;
pub mod worker;

pub use types::{encode, Key, Outcome};
pub use registry::WorkerRegistry;
pub use router::{Router, RouterBuilder};
pub use stats::RouterStats;
pub use worker::{FnWorker, Requester, Worker, WorkerCtx};
