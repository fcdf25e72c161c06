//! Structured ownership integration tests
//!
//! End-to-end checks that scopes own their tasks: cancellation reaches
//! every child, a sibling failure is raised exactly once at the join
//! point, and work never outlives its scope.

use weft::{
    Discipline, ExecutionContext, JoinError, Runtime, RuntimeConfig, Start, TaskState,
};

fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        workers: 4,
        idle_timeout_ms: 50,
        enable_stats: true,
    })
}

#[test]
fn test_cancel_fans_out_to_all_children() {
    const CHILDREN: usize = 32;

    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let mut handles = Vec::new();
    for _ in 0..CHILDREN {
        let handle = scope
            .spawn(ExecutionContext::Pooled, Start::Eager, async {
                loop {
                    weft::yield_now().await;
                }
            })
            .unwrap();
        handles.push(handle);
    }
    scope.cancel();
    rt.block_on(scope.join()).unwrap();
    for handle in &handles {
        assert_eq!(handle.state(), TaskState::Cancelled);
    }
    assert_eq!(rt.stats().cancelled(), CHILDREN);
    rt.shutdown();
}

#[test]
fn test_sibling_failure_raised_once_at_join() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let mut siblings = Vec::new();
    for _ in 0..5 {
        let handle = scope
            .spawn(ExecutionContext::Pooled, Start::Eager, async {
                loop {
                    weft::yield_now().await;
                }
            })
            .unwrap();
        siblings.push(handle);
    }
    scope
        .spawn(ExecutionContext::Pooled, Start::Eager, async {
            weft::yield_now().await;
            panic!("the one failure");
        })
        .unwrap();

    match rt.block_on(scope.join()) {
        Err(JoinError::Failed(failure)) => {
            assert_eq!(failure.message(), "the one failure");
        }
        other => panic!("expected the propagated failure, got {other:?}"),
    }
    // A second join observes the same condition, not a second raise of a
    // different one.
    match rt.block_on(scope.join()) {
        Err(JoinError::Failed(failure)) => {
            assert_eq!(failure.message(), "the one failure");
        }
        other => panic!("join is not stable: {other:?}"),
    }
    for sibling in &siblings {
        assert_eq!(sibling.state(), TaskState::Cancelled);
    }
    rt.shutdown();
}

#[test]
fn test_isolated_siblings_survive_failures() {
    let rt = runtime();
    let scope = rt.scope(Discipline::Isolated);
    let mut results = Vec::new();
    for i in 0..10 {
        let handle = scope
            .spawn_async(ExecutionContext::Pooled, Start::Eager, async move {
                if i % 3 == 0 {
                    panic!("unlucky {i}");
                }
                i
            })
            .unwrap();
        results.push((i, handle));
    }
    for (i, handle) in results {
        let joined = rt.block_on(handle);
        if i % 3 == 0 {
            assert!(!joined.unwrap_err().is_cancelled());
        } else {
            assert_eq!(joined.unwrap(), i);
        }
    }
    rt.block_on(scope.join()).unwrap();
    rt.shutdown();
}

#[test]
fn test_scope_cancel_releases_never_started_tasks() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let lazy = scope
        .spawn_async(ExecutionContext::Pooled, Start::Lazy, async { 1 })
        .unwrap();
    assert_eq!(lazy.state(), TaskState::New);
    scope.cancel();
    rt.block_on(scope.join()).unwrap();
    assert_eq!(lazy.state(), TaskState::Cancelled);
    assert!(rt.block_on(lazy).unwrap_err().is_cancelled());
    rt.shutdown();
}

#[test]
fn test_nested_scopes_tear_down_from_the_root() {
    let rt = runtime();
    let root = rt.scope(Discipline::AllFail);
    let mid = root.child(Discipline::Isolated).unwrap();
    let leaf = mid.child(Discipline::AllFail).unwrap();
    let task = leaf
        .spawn(ExecutionContext::Pooled, Start::Eager, async {
            loop {
                weft::yield_now().await;
            }
        })
        .unwrap();
    root.cancel();
    assert!(mid.is_cancelled());
    assert!(leaf.is_cancelled());
    assert!(rt.block_on(task.join()).unwrap_err().is_cancelled());
    rt.shutdown();
}

#[test]
fn test_task_scope_keeps_children_inside_the_task() {
    let rt = runtime();
    let scope = rt.scope(Discipline::AllFail);
    let handle = scope
        .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
            let inner = weft::task_scope(Discipline::AllFail);
            let a = inner
                .spawn_async(ExecutionContext::Pooled, Start::Eager, async { 20 })
                .unwrap();
            let b = inner
                .spawn_async(ExecutionContext::Pooled, Start::Eager, async { 22 })
                .unwrap();
            a.await.unwrap() + b.await.unwrap()
        })
        .unwrap();
    assert_eq!(rt.block_on(handle).unwrap(), 42);
    rt.block_on(scope.join()).unwrap();
    rt.shutdown();
}
