//! Computes fib(n) through the router and prints the memoization table.
//!
//! Run with: cargo run --example fib -- 25

use memo_router::{worker, Router, RouterConfig, WorkerCtx};

#[worker]
async fn fib(ctx: &WorkerCtx, n: u64) -> anyhow::Result<u64> {
    if n < 2 {
        return Ok(1);
    }
    let f1 = FibWorker::request(ctx, n - 1).await?;
    let f2 = FibWorker::request(ctx, n - 2).await?;
    Ok(f1 + f2)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let n: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 10,
    };

    let router = Router::builder()
        .with_config(RouterConfig::new("fib-demo"))
        .register(FibWorker)
        .start()?;

    match FibWorker::request(&router, n).await {
        Ok(value) => println!("fib({}) = {}", n, value),
        Err(e) => println!("Error: {}", e),
    }

    for (key, outcome) in router.snapshot() {
        match outcome {
            Ok(value) => println!("{} = {}", key, value),
            Err(e) => println!("{} failed: {}", key, e),
        }
    }

    let stats = router.stats();
    println!(
        "requests: {}, hits: {} ({:.0}%), dispatches: {}",
        stats.requests,
        stats.hits,
        stats.hit_ratio() * 100.0,
        stats.dispatches
    );

    router.stop().await;
    Ok(())
}
