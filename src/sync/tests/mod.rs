//! Mutex 单元测试
//!
//! 测试异步互斥锁的排他性与 FIFO 公平性

use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::runtime::Runtime;
use crate::scope::Discipline;
use crate::sync::Mutex;
use crate::task::{yield_now, Start};

fn test_runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        workers: 4,
        idle_timeout_ms: 50,
        enable_stats: false,
    })
}

#[cfg(test)]
mod basic_tests {
    use super::*;

    #[test]
    fn test_uncontended_lock() {
        let rt = test_runtime();
        let mutex = Mutex::new(5);
        let value = rt.block_on(async {
            let mut guard = mutex.lock().await;
            *guard += 1;
            *guard
        });
        assert_eq!(value, 6);
        assert_eq!(mutex.into_inner(), 6);
        rt.shutdown();
    }

    #[test]
    fn test_try_lock() {
        let mutex = Mutex::new(0);
        let guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_get_mut_bypasses_locking() {
        let mut mutex = Mutex::new(1);
        *mutex.get_mut() = 9;
        assert_eq!(mutex.into_inner(), 9);
    }

    #[test]
    fn test_with_lock() {
        let rt = test_runtime();
        let mutex = Mutex::new(String::from("a"));
        rt.block_on(mutex.with_lock(|s| s.push('b')));
        assert_eq!(mutex.into_inner(), "ab");
        rt.shutdown();
    }
}

#[cfg(test)]
mod contention_tests {
    use super::*;

    #[test]
    fn test_concurrent_increments_are_exclusive() {
        const TASKS: usize = 50;
        const INCREMENTS: usize = 200;

        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let counter = Arc::new(Mutex::new(0usize));
        let mut handles = Vec::new();
        for _ in 0..TASKS {
            let counter = Arc::clone(&counter);
            let handle = scope
                .spawn(ExecutionContext::Pooled, Start::Eager, async move {
                    for _ in 0..INCREMENTS {
                        let mut guard = counter.lock().await;
                        // Deliberately widen the critical section across a
                        // suspension point.
                        let read = *guard;
                        yield_now().await;
                        *guard = read + 1;
                    }
                })
                .unwrap();
            handles.push(handle);
        }
        for handle in handles {
            rt.block_on(handle.join()).unwrap();
        }
        rt.block_on(scope.join()).unwrap();
        assert_eq!(*rt.block_on(counter.lock()), TASKS * INCREMENTS);
        rt.shutdown();
    }

    #[test]
    fn test_guard_moves_across_suspension() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let mutex = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&mutex);
        let handle = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async move {
                let mut guard = shared.lock().await;
                guard.push(1);
                yield_now().await;
                guard.push(2);
                guard.len()
            })
            .unwrap();
        assert_eq!(rt.block_on(handle).unwrap(), 2);
        rt.shutdown();
    }
}

#[cfg(test)]
mod fairness_tests {
    use super::*;
    use std::future::Future;

    #[test]
    fn test_fifo_handoff_order() {
        let rt = test_runtime();
        let scope = rt.scope(Discipline::AllFail);
        let mutex = Arc::new(Mutex::new(()));
        let order = Arc::new(Mutex::new(Vec::new()));

        // Hold the lock on a confined thread while the waiters queue up
        // one at a time, so their arrival order is deterministic.
        let holder_ctx = rt.confined("holder");
        let gate = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let m = Arc::clone(&mutex);
        let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let release_flag = Arc::clone(&release);
        let holder = scope
            .spawn(
                ExecutionContext::Confined(holder_ctx),
                Start::Eager,
                async move {
                    let guard = m.lock().await;
                    while !release_flag.load(std::sync::atomic::Ordering::SeqCst) {
                        yield_now().await;
                    }
                    drop(guard);
                },
            )
            .unwrap();

        let waiter_ctx = rt.confined("waiters");
        let mut handles = Vec::new();
        for i in 0..5 {
            let m = Arc::clone(&mutex);
            let order = Arc::clone(&order);
            let gate = Arc::clone(&gate);
            let ctx = ExecutionContext::Confined(waiter_ctx.clone());
            let handle = scope
                .spawn(ctx, Start::Eager, async move {
                    // Enter the wait queue strictly in index order.
                    while gate.load(std::sync::atomic::Ordering::SeqCst) != i {
                        yield_now().await;
                    }
                    // The first poll enqueues this waiter; only then may
                    // the next one approach the lock.
                    let mut pending = Box::pin(m.lock());
                    let mut bumped = false;
                    let _guard = std::future::poll_fn(|cx| {
                        let poll = pending.as_mut().poll(cx);
                        if !bumped {
                            bumped = true;
                            gate.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                        poll
                    })
                    .await;
                    order.lock().await.push(i);
                })
                .unwrap();
            handles.push(handle);
        }

        // All five are queued once the gate has advanced past them.
        while gate.load(std::sync::atomic::Ordering::SeqCst) != 5 {
            std::thread::yield_now();
        }
        release.store(true, std::sync::atomic::Ordering::SeqCst);
        rt.block_on(holder.join()).unwrap();
        for handle in handles {
            rt.block_on(handle.join()).unwrap();
        }
        let order = rt.block_on(async { order.lock().await.clone() });
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        rt.shutdown();
    }
}
