//! Timer 单元测试
//!
//! 测试挂起式 sleep 与超时控制

use std::time::{Duration, Instant};

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::error::TimeoutError;
use crate::runtime::Runtime;
use crate::scope::Discipline;
use crate::task::{yield_now, Start};
use crate::time::{sleep, timeout};

fn test_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        workers: 4,
        idle_timeout_ms: 50,
        enable_stats: false,
    })
}

#[cfg(test)]
mod sleep_tests {
    use super::*;

    #[test]
    fn test_sleep_waits_at_least_duration() {
        let rt = test_runtime();
        let start = Instant::now();
        rt.block_on(sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        rt.shutdown();
    }

    #[test]
    fn test_zero_sleep_is_immediate() {
        let rt = test_runtime();
        rt.block_on(sleep(Duration::ZERO));
        rt.shutdown();
    }

    #[test]
    fn test_sleep_suspends_instead_of_blocking() {
        // One worker, two sleepers: both finish in roughly one interval,
        // which cannot happen if a sleep pins its worker thread.
        let rt = Runtime::with_config(RuntimeConfig {
            workers: 1,
            idle_timeout_ms: 50,
            enable_stats: false,
        });
        let scope = rt.scope(Discipline::AllFail);
        let start = Instant::now();
        let a = scope
            .spawn(ExecutionContext::Pooled, Start::Eager, async {
                sleep(Duration::from_millis(80)).await;
            })
            .unwrap();
        let b = scope
            .spawn(ExecutionContext::Pooled, Start::Eager, async {
                sleep(Duration::from_millis(80)).await;
            })
            .unwrap();
        rt.block_on(a.join()).unwrap();
        rt.block_on(b.join()).unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(80));
        assert!(
            elapsed < Duration::from_millis(160),
            "sleeps serialized: {elapsed:?}",
        );
        rt.shutdown();
    }

    #[test]
    fn test_cancelled_task_does_not_wait_out_sleep() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let start = Instant::now();
        let handle = scope
            .spawn(ExecutionContext::Pooled, Start::Eager, async {
                sleep(Duration::from_secs(30)).await;
            })
            .unwrap();
        // Let the sleeper register its deadline first.
        rt.block_on(sleep(Duration::from_millis(20)));
        handle.cancel();
        assert!(rt.block_on(handle.join()).unwrap_err().is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
        rt.shutdown();
    }
}

#[cfg(test)]
mod timeout_tests {
    use super::*;

    #[test]
    fn test_timeout_passes_fast_work_through() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let outer = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
                let inner = crate::scope::task_scope(Discipline::AllFail);
                timeout(&inner, ExecutionContext::Pooled, Duration::from_secs(10), async {
                    yield_now().await;
                    99
                })
                .await
            })
            .unwrap();
        let result = rt.block_on(outer).unwrap();
        assert_eq!(result.unwrap(), 99);
        rt.shutdown();
    }

    #[test]
    fn test_timeout_cancels_slow_work() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let start = Instant::now();
        let outer = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
                let inner = crate::scope::task_scope(Discipline::AllFail);
                timeout(&inner, ExecutionContext::Pooled, Duration::from_millis(50), async {
                    sleep(Duration::from_secs(30)).await;
                    0
                })
                .await
            })
            .unwrap();
        let result = rt.block_on(outer).unwrap();
        assert!(matches!(result, Err(TimeoutError::Elapsed)));
        assert!(start.elapsed() < Duration::from_secs(5));
        rt.shutdown();
    }

    #[test]
    fn test_timeout_reports_work_failure() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let outer = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
                let inner = crate::scope::task_scope(Discipline::AllFail);
                timeout(&inner, ExecutionContext::Pooled, Duration::from_secs(10), async {
                    panic!("inside deadline");
                })
                .await
            })
            .unwrap();
        let result: Result<i32, TimeoutError> = rt.block_on(outer).unwrap();
        match result {
            Err(TimeoutError::Failed(failure)) => {
                assert_eq!(failure.message(), "inside deadline");
            }
            other => panic!("expected a failure, got {other:?}"),
        }
        rt.shutdown();
    }

    #[test]
    fn test_timeout_runs_work_on_given_context() {
        let rt = test_runtime();
        let confined = rt.confined("deadline");
        let scope = rt.scope(Discipline::AllFail);
        let outer = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async move {
                let inner = crate::scope::task_scope(Discipline::AllFail);
                let ctx = ExecutionContext::Confined(confined);
                timeout(&inner, ctx, Duration::from_secs(10), async {
                    std::thread::current().name().map(str::to_owned)
                })
                .await
            })
            .unwrap();
        let name = rt.block_on(outer).unwrap().unwrap();
        assert_eq!(name.as_deref(), Some("weft-confined-deadline"));
        rt.shutdown();
    }
}
