//! Tasks: the fundamental schedulable unit.
//!
//! A task is a cooperatively scheduled state machine wrapping a suspendable
//! body (`Future`). Its lifetime is bounded by the [`Scope`](crate::scope::Scope)
//! that spawned it, its state advances monotonically along the graph in
//! [`state`], and its result slot is written exactly once, on the
//! transition into a terminal state.
//!
//! The module is split the same way the runtime treats a task:
//!
//! - [`TaskCore`] - the shared record (state, cancel flag, body slot,
//!   outcome slot, waiters) referenced by the scheduler, the owning scope
//!   and the handles.
//! - [`harness`] - the poll loop that drives a body on a worker thread.
//! - [`handle`] - what spawn returns to the caller.

pub mod handle;
pub mod harness;
pub mod state;

pub use handle::{JoinHandle, TaskHandle};
pub use harness::{checkpoint, is_cancelled, yield_now};
pub use state::TaskState;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::Waker;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::debug;

use crate::context::Binding;
use crate::error::Failure;
use crate::runtime::RuntimeShared;
use crate::scope::{CancelSource, ScopeCore};
use state::AtomicState;


/// Type-erased suspendable task body.
///
/// Bodies resolve to `Result<(), Failure>`: `Err` carries a failure that
/// surfaced after the user code finished (a child of a completing task
/// failed); panics inside user code are caught separately by the harness.
pub(crate) type BoxedBody = Pin<Box<dyn Future<Output = Result<(), Failure>> + Send + 'static>>;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Thread-safe task ID generator.
#[derive(Debug, Default)]
pub(crate) struct TaskIdGenerator {
    next_id: AtomicU64,
}

impl TaskIdGenerator {
    /// Create a generator starting at zero.
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Generate the next task ID.
    #[inline]
    pub(crate) fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Start mode for a spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Start {
    /// Schedule immediately on spawn.
    #[default]
    Eager,
    /// Defer scheduling until an explicit start or the first await of the
    /// task's result.
    Lazy,
}

/// Terminal outcome of a task, stored in its result slot exactly once.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    /// Body completed normally (terminal state `Completed`).
    Success,
    /// Body panicked or a child failed (terminal state `Cancelled` with a
    /// failure payload).
    Failed(Failure),
    /// Cooperative cancellation (terminal state `Cancelled`).
    Cancelled,
}

/// Shared task record.
///
/// Referenced by the owning scope (strong), the handles (strong) and the
/// wakers the body leaves behind at suspension points (strong, via the
/// waker protocol). The record never references its scope strongly, so the
/// scope tree stays acyclic in ownership terms.
pub(crate) struct TaskCore {
    id: TaskId,
    state: AtomicState,
    started: AtomicBool,
    cancel_requested: AtomicBool,
    queued: AtomicBool,
    binding: Binding,
    scope: Weak<ScopeCore>,
    runtime: Arc<RuntimeShared>,
    /// The suspended body, absent while being polled or after termination.
    body: Mutex<Option<BoxedBody>>,
    /// Write-once result slot.
    outcome: Mutex<Option<Outcome>>,
    /// Outcome decided at teardown start, applied once attached scopes are
    /// quiescent.
    pending_outcome: Mutex<Option<Outcome>>,
    /// Scopes opened by this task's body via `task_scope`.
    attached: Mutex<Vec<Arc<ScopeCore>>>,
    /// Wakers of callers awaiting this task's terminal state.
    waiters: Mutex<SmallVec<[Waker; 2]>>,
}

impl std::fmt::Debug for TaskCore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TaskCore")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("cancel_requested", &self.cancel_requested())
            .finish()
    }
}

impl TaskCore {
    /// Create a task record bound to the given context and owning scope.
    pub(crate) fn new(
        id: TaskId,
        binding: Binding,
        scope: Weak<ScopeCore>,
        runtime: Arc<RuntimeShared>,
        body: BoxedBody,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            state: AtomicState::new(),
            started: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            binding,
            scope,
            runtime,
            body: Mutex::new(Some(body)),
            outcome: Mutex::new(None),
            pending_outcome: Mutex::new(None),
            attached: Mutex::new(Vec::new()),
            waiters: Mutex::new(SmallVec::new()),
        })
    }

    /// Get the task ID.
    #[inline]
    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current state.
    #[inline]
    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    /// Whether the task has reached a terminal state.
    #[inline]
    pub(crate) fn is_terminal(&self) -> bool {
        self.state.get().is_terminal()
    }

    /// Whether cancellation has been requested.
    #[inline]
    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    /// Snapshot of the terminal outcome, if any.
    #[inline]
    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().clone()
    }

    /// Register a waker to be woken on the terminal transition.
    pub(crate) fn register_waiter(
        &self,
        waker: &Waker,
    ) {
        let mut waiters = self.waiters.lock();
        for existing in waiters.iter_mut() {
            if existing.will_wake(waker) {
                existing.clone_from(waker);
                return;
            }
        }
        waiters.push(waker.clone());
    }

    /// Start the task: the `New → Active` trigger. Idempotent.
    pub(crate) fn start(this: &Arc<Self>) {
        if this.started.swap(true, Ordering::SeqCst) {
            return;
        }
        Self::schedule(this);
    }

    /// Enqueue the task onto its bound execution context.
    ///
    /// Deduplicates concurrent wakeups via the `queued` flag; the harness
    /// clears the flag before each poll and re-polls if it was set again
    /// mid-poll, so no wakeup is lost.
    pub(crate) fn schedule(this: &Arc<Self>) {
        if this.is_terminal() {
            return;
        }
        if this.queued.swap(true, Ordering::SeqCst) {
            return;
        }
        this.binding.dispatch(Arc::clone(this));
    }

    /// Request cooperative cancellation. Idempotent.
    ///
    /// Sets the flag, propagates to every scope the body has opened, and
    /// schedules the task so the flag is observed at its next suspension
    /// point. The body is never preempted.
    pub(crate) fn request_cancel(this: &Arc<Self>) {
        if this.is_terminal() {
            return;
        }
        if this.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("cancelling {}", this.id);
        for scope in this.attached_snapshot() {
            scope.cancel(CancelSource::Parent);
        }
        // A lazy task that was never started still has to run through the
        // harness once so it terminates as Cancelled.
        this.started.store(true, Ordering::SeqCst);
        Self::schedule(this);
    }

    // ── Body slot (harness side) ───────────────────────────────────────

    #[inline]
    pub(crate) fn try_lock_body(&self) -> Option<MutexGuard<'_, Option<BoxedBody>>> {
        self.body.try_lock()
    }

    #[inline]
    pub(crate) fn clear_queued(&self) {
        self.queued.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn was_woken(&self) -> bool {
        self.queued.load(Ordering::SeqCst)
    }

    /// `New → Active` on first poll.
    pub(crate) fn mark_active(&self) {
        if self.state.get() == TaskState::New && !self.state.try_advance(TaskState::Active) {
            harness::scheduling_fault(self.id, "New task could not become Active");
        }
    }

    // ── Attached task scopes ───────────────────────────────────────────

    /// Attach a scope opened by this task's body.
    pub(crate) fn attach_scope(
        &self,
        scope: Arc<ScopeCore>,
    ) {
        self.attached.lock().push(scope);
    }

    pub(crate) fn attached_snapshot(&self) -> Vec<Arc<ScopeCore>> {
        self.attached.lock().clone()
    }

    /// First attached scope that still has live children, pruning the
    /// quiescent ones. Used by the completing-drain step.
    pub(crate) fn next_live_attached(&self) -> Option<Arc<ScopeCore>> {
        let mut attached = self.attached.lock();
        attached.retain(|scope| scope.live() > 0);
        attached.first().cloned()
    }

    /// `Active → Completing` when the body returned normally with children
    /// still draining.
    pub(crate) fn note_body_returned(&self) {
        let outstanding = self.attached.lock().iter().any(|scope| scope.live() > 0);
        if outstanding {
            self.state.try_advance(TaskState::Completing);
        }
    }

    /// Called by an attached scope when its last child terminates.
    pub(crate) fn attached_scope_quiescent(&self) {
        if self.state.get() == TaskState::Cancelling {
            self.try_finish_teardown();
        }
    }

    // ── Termination ────────────────────────────────────────────────────

    /// Normal completion: `Active|Completing → Completed`.
    pub(crate) fn complete_success(&self) {
        if !self.state.try_advance(TaskState::Completed) {
            harness::scheduling_fault(self.id, "completed task was not running");
        }
        self.complete_terminal(Outcome::Success);
    }

    /// Enter the `Cancelling` teardown with the given final outcome.
    ///
    /// The body has already been dropped (unwound) by the harness; the
    /// terminal transition waits for every attached scope to drain.
    pub(crate) fn begin_teardown(
        &self,
        outcome: Outcome,
    ) {
        if !self.state.try_advance(TaskState::Cancelling) {
            harness::scheduling_fault(self.id, "teardown from a terminal state");
        }
        *self.pending_outcome.lock() = Some(outcome);
        for scope in self.attached_snapshot() {
            scope.cancel(CancelSource::Parent);
        }
        self.try_finish_teardown();
    }

    /// `Cancelling → Cancelled` once every attached scope is quiescent.
    /// Racing callers are serialized by the state CAS.
    fn try_finish_teardown(&self) {
        let quiescent = self.attached.lock().iter().all(|scope| scope.live() == 0);
        if quiescent && self.state.try_advance(TaskState::Cancelled) {
            let outcome = self
                .pending_outcome
                .lock()
                .take()
                .unwrap_or(Outcome::Cancelled);
            self.complete_terminal(outcome);
        }
    }

    /// Populate the result slot, wake awaiters, and report to the owning
    /// scope. The slot write happens-before any waiter observes the
    /// terminal state.
    fn complete_terminal(
        &self,
        outcome: Outcome,
    ) {
        debug!("{} terminal: {:?}", self.id, self.state.get());
        *self.outcome.lock() = Some(outcome.clone());
        let waiters: SmallVec<[Waker; 2]> = std::mem::take(&mut *self.waiters.lock());
        for waker in waiters {
            waker.wake();
        }
        if let Some(scope) = self.scope.upgrade() {
            scope.child_terminal(self.id, &outcome);
        }
        self.runtime.record_terminal(&outcome);
    }
}
