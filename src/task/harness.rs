//! The poll harness: drives a task body on a worker thread.
//!
//! One invocation of [`run`] polls a task until it suspends or terminates.
//! The body slot's lock is held across the poll; a wakeup that lands while
//! the body is out of its slot sets the `queued` flag, which the harness
//! re-checks after parking the body so no wakeup is lost. Concurrent
//! runners that fail the `try_lock` simply return - the task is already
//! being driven, and the flag guarantees a re-poll.
//!
//! Cancellation is observed here, at the scheduling boundary: when the
//! flag is set and the task is not `Completing`, the suspended body is
//! dropped (unwound) instead of polled, and teardown begins.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use tracing::error;

use crate::error::{Failure, JoinError};
use crate::runtime::RuntimeShared;
use crate::task::{Outcome, TaskCore, TaskId, TaskState};

impl Wake for TaskCore {
    fn wake(self: Arc<Self>) {
        TaskCore::schedule(&self);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        TaskCore::schedule(self);
    }
}

// ── Ambient context ────────────────────────────────────────────────────

/// What is running on this thread right now.
#[derive(Clone)]
pub(crate) struct CurrentCtx {
    pub(crate) runtime: Arc<RuntimeShared>,
    pub(crate) task: Option<Arc<TaskCore>>,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentCtx>> = const { RefCell::new(None) };
}

/// Install an ambient context for the duration of the returned guard.
pub(crate) fn enter(ctx: CurrentCtx) -> CtxGuard {
    let prev = CURRENT.with(|current| current.replace(Some(ctx)));
    CtxGuard { prev }
}

pub(crate) struct CtxGuard {
    prev: Option<CurrentCtx>,
}

impl Drop for CtxGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|current| {
            *current.borrow_mut() = prev;
        });
    }
}

/// The task being polled on this thread, if any.
pub(crate) fn current_task() -> Option<Arc<TaskCore>> {
    CURRENT.with(|current| current.borrow().as_ref().and_then(|ctx| ctx.task.clone()))
}

/// The runtime owning this thread's execution, if any.
pub(crate) fn current_runtime() -> Option<Arc<RuntimeShared>> {
    CURRENT.with(|current| current.borrow().as_ref().map(|ctx| ctx.runtime.clone()))
}

/// Report an internal invariant violation and abort the worker.
///
/// Scheduling faults indicate a runtime bug; continuing would corrupt the
/// scope tree, so the affected worker goes down instead.
pub(crate) fn scheduling_fault(
    id: TaskId,
    message: &str,
) -> ! {
    error!("scheduling fault on {id}: {message}");
    panic!("scheduling fault on {id}: {message}");
}

// ── The poll loop ──────────────────────────────────────────────────────

enum Step {
    /// Nothing left to do (suspended again, or another runner owns it).
    Parked,
    /// Body returned `Ok(())`.
    Success,
    /// Cancellation observed or body failed; teardown with this outcome.
    Teardown(Outcome),
}

/// Drive a task until it suspends or terminates.
pub(crate) fn run(core: &Arc<TaskCore>) {
    let step = {
        let mut slot = match core.try_lock_body() {
            Some(slot) => slot,
            None => return,
        };
        loop {
            core.clear_queued();
            let state = core.state();
            if state.is_terminal() {
                break Step::Parked;
            }
            if core.cancel_requested() && state != TaskState::Completing {
                // Drop the suspended body: the cooperative unwind. An
                // empty slot means another runner already consumed the
                // body and owns the terminal transition.
                match slot.take() {
                    Some(body) => {
                        drop(body);
                        break Step::Teardown(Outcome::Cancelled);
                    }
                    None => break Step::Parked,
                }
            }
            let mut body = match slot.take() {
                Some(body) => body,
                None => break Step::Parked,
            };
            core.mark_active();
            let waker = Waker::from(Arc::clone(core));
            let mut cx = Context::from_waker(&waker);
            let ctx_guard = enter(CurrentCtx {
                runtime: Arc::clone(core.runtime()),
                task: Some(Arc::clone(core)),
            });
            let poll = panic::catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));
            drop(ctx_guard);
            match poll {
                Err(payload) => {
                    break Step::Teardown(Outcome::Failed(Failure::from_panic(payload)));
                }
                Ok(Poll::Ready(Ok(()))) => break Step::Success,
                Ok(Poll::Ready(Err(failure))) => break Step::Teardown(Outcome::Failed(failure)),
                Ok(Poll::Pending) => {
                    *slot = Some(body);
                    if !core.was_woken() {
                        break Step::Parked;
                    }
                    // A wakeup raced with the poll; go around again.
                }
            }
        }
    };
    match step {
        Step::Parked => {}
        Step::Success => core.complete_success(),
        Step::Teardown(outcome) => core.begin_teardown(outcome),
    }
}

/// Drain the scopes this task's body opened, after the body returned.
///
/// Runs as the tail of every spawned body. Enters `Completing` if any
/// attached scope still has live children, then joins them in order. A
/// failure reported by an attached all-fail scope fails the task; a
/// cancelled attached scope is cooperative teardown and is not a failure.
pub(crate) async fn drain_attached() -> Result<(), Failure> {
    let Some(task) = current_task() else {
        return Ok(());
    };
    task.note_body_returned();
    while let Some(scope) = task.next_live_attached() {
        match crate::scope::join_core(scope).await {
            Ok(()) | Err(JoinError::Cancelled) => {}
            Err(JoinError::Failed(failure)) => return Err(failure),
        }
    }
    Ok(())
}

// ── Cooperative suspension points ──────────────────────────────────────

/// Whether the current task has been asked to cancel.
///
/// `false` outside of a task.
pub fn is_cancelled() -> bool {
    current_task().is_some_and(|task| task.cancel_requested())
}

/// Yield the current task back to its execution context once.
///
/// The task is woken immediately and re-enters its context's ready queue
/// behind already-queued work.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
#[derive(Debug)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Explicit cancellation check.
///
/// Completes immediately when no cancellation is pending; otherwise
/// suspends once so the runtime can observe the flag and unwind the body.
/// Bodies running long synchronous stretches should call this
/// periodically - a task never yields implicitly.
pub fn checkpoint() -> Checkpoint {
    Checkpoint { yielded: false }
}

/// Future returned by [`checkpoint`].
#[derive(Debug)]
pub struct Checkpoint {
    yielded: bool,
}

impl Future for Checkpoint {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if self.yielded || !is_cancelled() {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
