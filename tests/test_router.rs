//! Integration tests for the memoizing router
//!
//! Workers here are written by hand against the `Worker` trait; the macro
//! path is covered in test_worker_macro.rs.

use async_trait::async_trait;
use memo_router::{Key, Router, RouterConfig, RouterError, Value, Worker, WorkerCtx};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// fib(0) = fib(1) = 1, counting how often each n runs
#[derive(Default)]
struct Fib {
    runs: Arc<Mutex<HashMap<u64, usize>>>,
}

#[async_trait]
impl Worker for Fib {
    fn name(&self) -> &str {
        "fib"
    }

    async fn run(&self, ctx: &WorkerCtx) -> anyhow::Result<Value> {
        let (n,): (u64,) = ctx.args()?;
        *self.runs.lock().entry(n).or_default() += 1;

        if n < 2 {
            return Ok(json!(1));
        }
        let f1: u64 = ctx.get_as("fib", &(n - 1,)).await?;
        let f2: u64 = ctx.get_as("fib", &(n - 2,)).await?;
        Ok(json!(f1 + f2))
    }
}

/// Requests `next` with the same argument, forming a chain
struct Chain {
    name: &'static str,
    next: &'static str,
}

#[async_trait]
impl Worker for Chain {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &WorkerCtx) -> anyhow::Result<Value> {
        let value = ctx.get(self.next, &()).await?;
        Ok(value)
    }
}

fn fib_router() -> (Router, Arc<Mutex<HashMap<u64, usize>>>) {
    let fib = Fib::default();
    let runs = fib.runs.clone();
    let router = Router::builder()
        .with_config(RouterConfig::new("fib-test"))
        .register(fib)
        .start()
        .unwrap();
    (router, runs)
}

#[tokio::test]
async fn test_fib_10_memoizes_every_step() {
    let (router, runs) = fib_router();

    let value: u64 = router.request_as("fib", &(10u64,)).await.unwrap();
    assert_eq!(value, 89);

    let cached: Vec<u64> = router
        .snapshot()
        .into_iter()
        .filter(|(key, _)| key.name() == "fib")
        .map(|(key, _)| key.args::<(u64,)>().unwrap().0)
        .collect();
    let mut sorted = cached.clone();
    sorted.sort();
    assert_eq!(sorted, (0..=10).collect::<Vec<_>>());
    assert_eq!(router.cached_len(), 11);

    let runs = runs.lock();
    assert_eq!(runs.len(), 11);
    assert!(runs.values().all(|&count| count == 1));

    router.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_fan_in_runs_once() {
    let (router, runs) = fib_router();

    let first = {
        let router = router.clone();
        tokio::spawn(async move { router.request_as::<u64, _>("fib", &(20u64,)).await })
    };
    let second = {
        let router = router.clone();
        tokio::spawn(async move { router.request_as::<u64, _>("fib", &(20u64,)).await })
    };

    let (first, second) = tokio::join!(first, second);
    let first = first.unwrap().unwrap();
    let second = second.unwrap().unwrap();
    assert_eq!(first, 10946);
    assert_eq!(first, second);

    let runs = runs.lock();
    assert_eq!(runs.get(&20), Some(&1));
    assert!(runs.values().all(|&count| count == 1));

    router.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_waiters_share_one_dispatch() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let router = Router::builder()
        .register_fn("slow", move |ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                let (n,): (u64,) = ctx.args()?;
                Ok(json!(n * 3))
            }
        })
        .start()
        .unwrap();

    let requests = (0..16).map(|_| {
        let router = router.clone();
        tokio::spawn(async move { router.request("slow", &(7u64,)).await })
    });
    let results = futures::future::join_all(requests).await;

    assert_eq!(results.len(), 16);
    for result in results {
        assert_eq!(result.unwrap().unwrap(), json!(21));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(router.stats().dispatches, 1);

    router.stop().await;
}

#[tokio::test]
async fn test_cached_value_returned_verbatim() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let router = Router::builder()
        .register_fn("ticket", move |_ctx| {
            let counter = counter.clone();
            async move { Ok(json!(counter.fetch_add(1, Ordering::SeqCst) + 100)) }
        })
        .start()
        .unwrap();

    let first = router.request("ticket", &"a").await.unwrap();
    let second = router.request("ticket", &"a").await.unwrap();
    assert_eq!(first, json!(100));
    assert_eq!(second, json!(100));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // different arguments are a different key
    assert_eq!(router.request("ticket", &"b").await.unwrap(), json!(101));

    let stats = router.stats();
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.hits, 1);
    router.stop().await;
}

#[tokio::test]
async fn test_three_way_cycle_is_rejected() {
    let router = Router::builder()
        .register(Chain { name: "a", next: "b" })
        .register(Chain { name: "b", next: "c" })
        .register(Chain { name: "c", next: "a" })
        .start()
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), router.request("a", &())).await;
    let err = result.expect("cyclic request deadlocked").unwrap_err();

    let a = Key::new("a", &()).unwrap();
    let b = Key::new("b", &()).unwrap();
    let c = Key::new("c", &()).unwrap();
    match &err {
        RouterError::Cycle { key, requester, chain } => {
            assert_eq!(key, &a);
            assert_eq!(requester, &c);
            assert_eq!(chain, &vec![a.clone(), b.clone(), c.clone(), a.clone()]);
        }
        other => panic!("expected a cycle error, got {:?}", other),
    }

    // the failure propagated verbatim and is now each key's memoized result
    assert_eq!(router.cached(&c), Some(Err(err.clone())));
    assert_eq!(router.cached(&a), Some(Err(err)));
    assert_eq!(router.stats().cycles_rejected, 1);
    assert_eq!(router.callers(&a), vec![Key::root()]);

    router.stop().await;
}

#[tokio::test]
async fn test_self_request_is_rejected() {
    let router = Router::builder()
        .register_fn("selfish", |ctx| async move {
            let value = ctx.get("selfish", &()).await?;
            Ok(value)
        })
        .start()
        .unwrap();

    let err = router.request("selfish", &()).await.unwrap_err();
    let key = Key::new("selfish", &()).unwrap();
    assert_eq!(err, RouterError::cycle(&key, &key, vec![key.clone(), key.clone()]));

    // asking directly with the same requester and target never reaches the coordinator
    let requests_before = router.stats().requests;
    let err = router.get(&key, "selfish", &()).await.unwrap_err();
    assert_eq!(err.category(), "cycle");
    assert_eq!(router.stats().requests, requests_before);

    router.stop().await;
}

#[tokio::test]
async fn test_diamond_dependencies_do_not_cycle() {
    let base_runs = Arc::new(AtomicUsize::new(0));
    let counter = base_runs.clone();
    let router = Router::builder()
        .register_fn("top", |ctx| async move {
            let left: i64 = ctx.get_as("left", &()).await?;
            let right: i64 = ctx.get_as("right", &()).await?;
            Ok(json!(left + right))
        })
        .register_fn("left", |ctx| async move {
            let base: i64 = ctx.get_as("base", &()).await?;
            Ok(json!(base + 1))
        })
        .register_fn("right", |ctx| async move {
            let base: i64 = ctx.get_as("base", &()).await?;
            Ok(json!(base + 2))
        })
        .register_fn("base", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(10))
            }
        })
        .start()
        .unwrap();

    assert_eq!(router.request("top", &()).await.unwrap(), json!(23));
    assert_eq!(base_runs.load(Ordering::SeqCst), 1);

    let base = Key::new("base", &()).unwrap();
    assert_eq!(
        router.callers(&base),
        vec![Key::new("left", &()).unwrap(), Key::new("right", &()).unwrap()]
    );
    router.stop().await;
}

#[tokio::test]
async fn test_unregistered_name_is_cached_error() {
    let router = Router::builder().start().unwrap();

    let first = router.request("missing", &(1,)).await.unwrap_err();
    let second = router.request("missing", &(1,)).await.unwrap_err();

    let key = Key::new("missing", &(1,)).unwrap();
    assert_eq!(first, RouterError::Unregistered { key: key.clone() });
    assert_eq!(first, second);
    assert_eq!(router.cached(&key), Some(Err(first)));

    let stats = router.stats();
    assert_eq!(stats.unregistered, 1);
    assert_eq!(stats.dispatches, 1);
    assert_eq!(stats.hits, 1);
    router.stop().await;
}

#[tokio::test]
async fn test_failed_computation_is_not_retried() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let router = Router::builder()
        .register_fn("flaky", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("upstream unavailable")
            }
        })
        .start()
        .unwrap();

    let key = Key::new("flaky", &()).unwrap();
    for _ in 0..3 {
        let err = router.request("flaky", &()).await.unwrap_err();
        assert_eq!(err, RouterError::computation(&key, "upstream unavailable"));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    router.stop().await;
}

#[tokio::test]
async fn test_panicking_worker_becomes_error() {
    let router = Router::builder()
        .register_fn("boom", |_ctx| async move {
            if true {
                panic!("worker exploded");
            }
            Ok(json!(null))
        })
        .start()
        .unwrap();

    let err = router.request("boom", &()).await.unwrap_err();
    match err {
        RouterError::Computation { message, .. } => assert!(message.contains("worker exploded")),
        other => panic!("expected computation error, got {:?}", other),
    }
    router.stop().await;
}

#[tokio::test]
async fn test_blocked_request_fails_on_stop() {
    let router = Router::builder()
        .register_fn("forever", |_ctx| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        })
        .start()
        .unwrap();

    let pending = {
        let router = router.clone();
        tokio::spawn(async move { router.request("forever", &()).await })
    };
    // let the request reach the coordinator
    while router.stats().dispatches == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    router.stop().await;
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, RouterError::Shutdown { .. }));
}

#[tokio::test]
async fn test_type_mismatch_is_encoding_error() {
    let router = Router::builder()
        .register_fn("text", |_ctx| async { Ok(json!("not a number")) })
        .start()
        .unwrap();

    let err = router.request_as::<u64, _>("text", &()).await.unwrap_err();
    assert_eq!(err.category(), "encoding");
    assert_eq!(err.key(), Some(&Key::new("text", &()).unwrap()));
    router.stop().await;
}

#[tokio::test]
async fn test_empty_name_is_rejected_before_dispatch() {
    let router = Router::builder().start().unwrap();

    let err = router.request("", &()).await.unwrap_err();
    assert_eq!(err.category(), "encoding");
    assert_eq!(router.stats().requests, 0);
    assert_eq!(router.cached_len(), 0);
    router.stop().await;
}

/// `a(n)` waits on `b(n)` and `b(n)` waits on `a(n)`
fn mutual_router() -> Router {
    Router::builder()
        .register_fn("a", |ctx| async move {
            let (n,): (u32,) = ctx.args()?;
            let value = ctx.get("b", &(n,)).await?;
            Ok(value)
        })
        .register_fn("b", |ctx| async move {
            let (n,): (u32,) = ctx.args()?;
            let value = ctx.get("a", &(n,)).await?;
            Ok(value)
        })
        .start()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_mutual_requests_are_both_rejected() {
    let router = mutual_router();

    for n in 0..200u32 {
        let from_a = {
            let router = router.clone();
            tokio::spawn(async move { router.request("a", &(n,)).await })
        };
        let from_b = {
            let router = router.clone();
            tokio::spawn(async move { router.request("b", &(n,)).await })
        };

        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
            futures::future::join(from_a, from_b).await
        })
        .await
        .unwrap_or_else(|_| panic!("round {} deadlocked", n));

        let a = a.unwrap().unwrap_err();
        let b = b.unwrap().unwrap_err();
        assert!(matches!(a, RouterError::Cycle { .. }), "round {}: {:?}", n, a);
        assert!(matches!(b, RouterError::Cycle { .. }), "round {}: {:?}", n, b);
    }

    // exactly one closing edge is refused per round
    assert_eq!(router.stats().cycles_rejected, 200);
    router.stop().await;
}
