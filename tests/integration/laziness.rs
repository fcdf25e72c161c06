//! Lazy start integration tests
//!
//! A lazy task runs only once started, and the await-starts-it side
//! effect has a documented consequence: awaiting lazy tasks one by one
//! serializes them, while starting them all first preserves concurrency.

use std::time::{Duration, Instant};

use weft::{Discipline, ExecutionContext, Runtime, RuntimeConfig, Start};

const UNIT: Duration = Duration::from_millis(100);

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        workers: 4,
        idle_timeout_ms: 50,
        enable_stats: false,
    })
}

#[test]
fn test_awaiting_lazy_tasks_serializes_them() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let first = scope
        .spawn_async(ExecutionContext::Pooled, Start::Lazy, async {
            weft::time::sleep(UNIT).await;
            1
        })
        .unwrap();
    let second = scope
        .spawn_async(ExecutionContext::Pooled, Start::Lazy, async {
            weft::time::sleep(UNIT).await;
            2
        })
        .unwrap();

    let start = Instant::now();
    let sum = rt.block_on(async { first.await.unwrap() + second.await.unwrap() });
    let elapsed = start.elapsed();

    assert_eq!(sum, 3);
    // The second task only started once the first finished.
    assert!(elapsed >= 2 * UNIT, "expected serial execution: {elapsed:?}");
    rt.shutdown();
}

#[test]
fn test_starting_before_awaiting_keeps_concurrency() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let first = scope
        .spawn_async(ExecutionContext::Pooled, Start::Lazy, async {
            weft::time::sleep(UNIT).await;
            1
        })
        .unwrap();
    let second = scope
        .spawn_async(ExecutionContext::Pooled, Start::Lazy, async {
            weft::time::sleep(UNIT).await;
            2
        })
        .unwrap();

    let start = Instant::now();
    first.start();
    second.start();
    let sum = rt.block_on(async { first.await.unwrap() + second.await.unwrap() });
    let elapsed = start.elapsed();

    assert_eq!(sum, 3);
    assert!(elapsed >= UNIT);
    assert!(
        elapsed < 2 * UNIT,
        "expected concurrent execution: {elapsed:?}",
    );
    rt.shutdown();
}

#[test]
fn test_eager_tasks_run_without_any_await() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let seen = std::sync::Arc::clone(&flag);
    scope
        .spawn(ExecutionContext::Pooled, Start::Eager, async move {
            seen.store(true, std::sync::atomic::Ordering::SeqCst);
        })
        .unwrap();
    rt.block_on(scope.join()).unwrap();
    assert!(flag.load(std::sync::atomic::Ordering::SeqCst));
    rt.shutdown();
}
