//! Handles returned by spawn operations.
//!
//! [`JoinHandle<T>`] is the result-bearing handle: awaiting it yields the
//! task's value, or the failure/cancellation condition, exactly when the
//! task reaches a terminal state. Awaiting a lazy task starts it as a side
//! effect. [`TaskHandle`] is the non-result variant and only offers
//! "wait until terminal".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;

use crate::error::JoinError;
use crate::task::{harness, Outcome, TaskCore, TaskId, TaskState};

/// Write-once slot carrying the typed value from the body to the handle.
pub(crate) struct ResultCell<T> {
    value: Mutex<Option<T>>,
}

impl<T> ResultCell<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub(crate) fn set(
        &self,
        value: T,
    ) {
        *self.value.lock() = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.value.lock().take()
    }
}

/// Handle to a spawned task with no result.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) core: Arc<TaskCore>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .finish()
    }
}

impl TaskHandle {
    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Whether the task has reached a terminal state.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    /// Start a lazy task. No effect on a task that is already started.
    #[inline]
    pub fn start(&self) {
        TaskCore::start(&self.core);
    }

    /// Request cooperative cancellation. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        TaskCore::request_cancel(&self.core);
    }

    /// Suspend until the task is terminal.
    pub fn join(&self) -> JoinTask {
        JoinTask {
            core: Arc::clone(&self.core),
        }
    }
}

/// Future returned by [`TaskHandle::join`].
#[derive(Debug)]
pub struct JoinTask {
    core: Arc<TaskCore>,
}

impl Future for JoinTask {
    type Output = Result<(), JoinError>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        TaskCore::start(&self.core);
        poll_outcome(&self.core, cx).map(|outcome| match outcome {
            Outcome::Success => Ok(()),
            Outcome::Failed(failure) => Err(JoinError::Failed(failure)),
            Outcome::Cancelled => Err(JoinError::Cancelled),
        })
    }
}

/// Handle to a spawned result-bearing task.
///
/// Implements [`Future`]; awaiting suspends the caller until the result
/// slot is populated (returning immediately when it already is), starting
/// a lazy task first. Note the documented pitfall: awaiting one lazy task
/// before starting the next serializes them.
pub struct JoinHandle<T> {
    pub(crate) core: Arc<TaskCore>,
    pub(crate) cell: Arc<ResultCell<T>>,
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.core.id())
            .field("state", &self.core.state())
            .finish()
    }
}

impl<T> JoinHandle<T> {
    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.core.state()
    }

    /// Whether the task has reached a terminal state.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.core.is_terminal()
    }

    /// Start a lazy task without awaiting it.
    ///
    /// Starting every lazy task before awaiting any of them preserves
    /// their concurrency.
    #[inline]
    pub fn start(&self) {
        TaskCore::start(&self.core);
    }

    /// Request cooperative cancellation. Idempotent.
    #[inline]
    pub fn cancel(&self) {
        TaskCore::request_cancel(&self.core);
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        // Reading a lazy task's result starts it.
        TaskCore::start(&self.core);
        let this = self.get_mut();
        poll_outcome(&this.core, cx).map(|outcome| match outcome {
            Outcome::Success => match this.cell.take() {
                Some(value) => Ok(value),
                None => harness::scheduling_fault(
                    this.core.id(),
                    "completed task has an empty result slot",
                ),
            },
            Outcome::Failed(failure) => Err(JoinError::Failed(failure)),
            Outcome::Cancelled => Err(JoinError::Cancelled),
        })
    }
}

/// Wait for a terminal outcome, registering before the second check so a
/// completion racing with registration is never missed.
fn poll_outcome(
    core: &Arc<TaskCore>,
    cx: &mut Context<'_>,
) -> Poll<Outcome> {
    if let Some(outcome) = core.outcome() {
        return Poll::Ready(outcome);
    }
    core.register_waiter(cx.waker());
    match core.outcome() {
        Some(outcome) => Poll::Ready(outcome),
        None => Poll::Pending,
    }
}
