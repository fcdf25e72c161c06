//! Timer integration tests
//!
//! Sleeping suspends a task without occupying a worker, and timeouts
//! cancel overrunning work cooperatively.

use std::time::{Duration, Instant};

use weft::time::{sleep, timeout};
use weft::{Discipline, ExecutionContext, Runtime, RuntimeConfig, Start, TimeoutError};

const UNIT: Duration = Duration::from_millis(100);

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        workers: 2,
        idle_timeout_ms: 50,
        enable_stats: false,
    })
}

#[test]
fn test_parallel_unit_sleeps_finish_in_one_unit() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let start = Instant::now();
    let a = scope
        .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
            sleep(UNIT).await;
            1
        })
        .unwrap();
    let b = scope
        .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
            sleep(UNIT).await;
            2
        })
        .unwrap();
    let sum = rt.block_on(async { a.await.unwrap() + b.await.unwrap() });
    let elapsed = start.elapsed();

    assert_eq!(sum, 3);
    assert!(elapsed >= UNIT);
    assert!(elapsed < 2 * UNIT, "sleeps must overlap: {elapsed:?}");
    rt.shutdown();
}

#[test]
fn test_timeout_end_to_end() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let handle = scope
        .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
            let inner = weft::task_scope(Discipline::AllFail);
            let fast = timeout(&inner, ExecutionContext::Pooled, Duration::from_secs(10), async {
                "fast"
            })
            .await;
            let slow = timeout(&inner, ExecutionContext::Pooled, Duration::from_millis(50), async {
                sleep(Duration::from_secs(30)).await;
                "slow"
            })
            .await;
            (fast, slow)
        })
        .unwrap();
    let (fast, slow) = rt.block_on(handle).unwrap();
    assert_eq!(fast.unwrap(), "fast");
    assert!(matches!(slow, Err(TimeoutError::Elapsed)));
    rt.shutdown();
}

#[test]
fn test_sleep_respects_cancellation() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let start = Instant::now();
    let handle = scope
        .spawn(ExecutionContext::Pooled, Start::Eager, async {
            sleep(Duration::from_secs(60)).await;
        })
        .unwrap();
    rt.block_on(sleep(Duration::from_millis(20)));
    scope.cancel();
    rt.block_on(scope.join()).unwrap();
    assert!(handle.is_terminal());
    assert!(start.elapsed() < Duration::from_secs(5));
    rt.shutdown();
}
