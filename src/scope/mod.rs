//! Scopes: structured ownership of tasks.
//!
//! A scope owns the tasks spawned into it, completes only when every child
//! has reached a terminal state, and defines how failure and cancellation
//! travel between siblings and toward the parent:
//!
//! - [`Discipline::AllFail`] (the default): the first unhandled failure
//!   among the children cancels every sibling, and the scope re-raises
//!   that failure once at its join point. Further concurrent failures are
//!   recorded as suppressed, not dropped.
//! - [`Discipline::Isolated`]: a child's failure stays in that child's own
//!   result slot; siblings are unaffected. For computations where partial
//!   results are meaningful.
//!
//! Scopes form a tree: parents hold weak child-scope links (cancellation
//! flows down) plus strong task links (join waits on tasks). There is no
//! ambient root scope; scopes are created from an explicit
//! [`Runtime`](crate::runtime::Runtime).

pub mod lifecycle;

pub use lifecycle::LifecycleScope;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::error::{Failure, JoinError, SpawnError};
use crate::runtime::RuntimeShared;
use crate::task::handle::ResultCell;
use crate::task::{
    harness, BoxedBody, JoinHandle, Outcome, Start, TaskCore, TaskHandle, TaskId,
};


/// Failure/cancellation propagation discipline of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// First unhandled child failure cancels all siblings and re-raises at
    /// the join point.
    #[default]
    AllFail,
    /// Child failures are captured per-child and do not cancel siblings.
    Isolated,
}

/// Unique scope identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) u64);

impl std::fmt::Display for ScopeId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Scope({})", self.0)
    }
}

/// Where a scope's cancellation came from. First request wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelSource {
    /// Requested directly on this scope's handle; swallowed at this
    /// scope's join boundary.
    Direct,
    /// Propagated from the parent scope or owning task; re-raised as
    /// [`JoinError::Cancelled`] at the join point.
    Parent,
    /// Triggered by a sibling failure in an all-fail scope.
    Failure,
}

/// Shared scope record.
///
/// Parent links are not held here: cancellation only ever flows
/// downward, through `child_scopes`.
pub(crate) struct ScopeCore {
    id: ScopeId,
    discipline: Discipline,
    /// Task whose body opened this scope, if any.
    owner: Weak<TaskCore>,
    runtime: Arc<RuntimeShared>,
    /// Child tasks, in spawn order.
    children: Mutex<IndexMap<TaskId, Arc<TaskCore>>>,
    /// Nested scopes, for cancellation propagation only.
    child_scopes: Mutex<Vec<Weak<ScopeCore>>>,
    /// Child tasks not yet terminal.
    live: AtomicUsize,
    /// Set under the `children` lock so spawn and cancel cannot race.
    cancelled: AtomicBool,
    cancel_source: Mutex<Option<CancelSource>>,
    /// First unhandled child failure (all-fail discipline).
    failure: Mutex<Option<Failure>>,
    /// Concurrent failures that lost the race to be first.
    suppressed: Mutex<Vec<Failure>>,
    join_wakers: Mutex<SmallVec<[Waker; 2]>>,
}

impl std::fmt::Debug for ScopeCore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ScopeCore")
            .field("id", &self.id)
            .field("discipline", &self.discipline)
            .field("live", &self.live())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ScopeCore {
    pub(crate) fn new(
        discipline: Discipline,
        owner: Weak<TaskCore>,
        runtime: Arc<RuntimeShared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: runtime.next_scope_id(),
            discipline,
            owner,
            runtime,
            children: Mutex::new(IndexMap::new()),
            child_scopes: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            cancel_source: Mutex::new(None),
            failure: Mutex::new(None),
            suppressed: Mutex::new(Vec::new()),
            join_wakers: Mutex::new(SmallVec::new()),
        })
    }

    #[inline]
    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }

    #[inline]
    pub(crate) fn discipline(&self) -> Discipline {
        self.discipline
    }

    /// Number of non-terminal child tasks.
    #[inline]
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    /// Register a new child task. A cancelled scope refuses registration.
    pub(crate) fn register(
        &self,
        task: Arc<TaskCore>,
    ) -> Result<(), SpawnError> {
        let mut children = self.children.lock();
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(SpawnError::ScopeCancelled);
        }
        if !self.runtime.scheduler().is_running() {
            return Err(SpawnError::RuntimeShutdown);
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        children.insert(task.id(), task);
        Ok(())
    }

    /// Link a nested scope for cancellation propagation.
    ///
    /// Returns whether this scope was already cancelled; the caller then
    /// cancels the child itself, closing the race with a concurrent
    /// [`cancel`](ScopeCore::cancel) that drained the list first.
    pub(crate) fn add_child_scope(
        &self,
        child: Weak<ScopeCore>,
    ) -> bool {
        self.child_scopes.lock().push(child);
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A child task reached a terminal state.
    ///
    /// Failure handling runs before the live-count decrement so join
    /// waiters woken by the quiescent transition observe the recorded
    /// failure.
    pub(crate) fn child_terminal(
        self: &Arc<Self>,
        id: TaskId,
        outcome: &Outcome,
    ) {
        if let Outcome::Failed(failure) = outcome {
            if self.discipline == Discipline::AllFail {
                self.record_failure(failure.clone());
            }
        }
        self.children.lock().shift_remove(&id);
        let remaining = self.live.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            self.notify_quiescent();
        }
    }

    /// Record an unhandled child failure; the first one cancels the
    /// remaining siblings.
    fn record_failure(
        self: &Arc<Self>,
        failure: Failure,
    ) {
        let is_first = {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(failure.clone());
                true
            } else {
                false
            }
        };
        if is_first {
            debug!("{} failing: {failure}", self.id);
            self.cancel(CancelSource::Failure);
        } else {
            debug!("{} suppressing concurrent failure: {failure}", self.id);
            self.suppressed.lock().push(failure);
        }
    }

    /// Cancel this scope and, recursively, everything beneath it.
    /// Idempotent; the first source wins.
    pub(crate) fn cancel(
        self: &Arc<Self>,
        source: CancelSource,
    ) {
        let children: Vec<Arc<TaskCore>> = {
            let children = self.children.lock();
            if self.cancelled.swap(true, Ordering::SeqCst) {
                return;
            }
            children.values().cloned().collect()
        };
        {
            let mut slot = self.cancel_source.lock();
            if slot.is_none() {
                *slot = Some(source);
            }
        }
        debug!("{} cancelled ({source:?}), {} children", self.id, children.len());
        for task in children {
            TaskCore::request_cancel(&task);
        }
        let nested: Vec<Weak<ScopeCore>> = std::mem::take(&mut *self.child_scopes.lock());
        for scope in nested {
            if let Some(scope) = scope.upgrade() {
                scope.cancel(CancelSource::Parent);
            }
        }
    }

    /// All children terminal: wake joiners and tell the owning task.
    fn notify_quiescent(self: &Arc<Self>) {
        let wakers: SmallVec<[Waker; 2]> = std::mem::take(&mut *self.join_wakers.lock());
        for waker in wakers {
            waker.wake();
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.attached_scope_quiescent();
        }
    }

    pub(crate) fn register_join_waker(
        &self,
        waker: &Waker,
    ) {
        let mut wakers = self.join_wakers.lock();
        for existing in wakers.iter_mut() {
            if existing.will_wake(waker) {
                existing.clone_from(waker);
                return;
            }
        }
        wakers.push(waker.clone());
    }

    /// Condition reported at the join point once the scope is quiescent.
    pub(crate) fn join_result(&self) -> Result<(), JoinError> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(JoinError::Failed(failure));
        }
        match *self.cancel_source.lock() {
            // Cancellation requested on this scope itself is expected
            // teardown and is swallowed at this boundary.
            Some(CancelSource::Direct) | None => Ok(()),
            Some(CancelSource::Parent) | Some(CancelSource::Failure) => {
                Err(JoinError::Cancelled)
            }
        }
    }

    pub(crate) fn first_failure(&self) -> Option<Failure> {
        self.failure.lock().clone()
    }

    pub(crate) fn suppressed_failures(&self) -> Vec<Failure> {
        self.suppressed.lock().clone()
    }
}

/// Suspend until every child of `core` is terminal.
pub(crate) fn join_core(core: Arc<ScopeCore>) -> ScopeJoin {
    ScopeJoin { core }
}

/// Future returned by [`Scope::join`].
#[derive(Debug)]
pub struct ScopeJoin {
    core: Arc<ScopeCore>,
}

impl Future for ScopeJoin {
    type Output = Result<(), JoinError>;

    fn poll(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        // If the surrounding task was cancelled while waiting, propagate
        // to every remaining child before the wait can complete. The check
        // re-runs whenever this future is polled again; the scope itself
        // wakes it once the last child is terminal.
        if let Some(task) = harness::current_task() {
            if task.cancel_requested() && !self.core.is_cancelled() {
                self.core.cancel(CancelSource::Parent);
            }
        }
        if self.core.live() == 0 {
            return Poll::Ready(self.core.join_result());
        }
        self.core.register_join_waker(cx.waker());
        if self.core.live() == 0 {
            return Poll::Ready(self.core.join_result());
        }
        Poll::Pending
    }
}

/// Handle to a scope.
///
/// Cloneable; all clones refer to the same scope. Dropping every handle
/// does not cancel the scope - teardown is always an explicit `cancel`
/// (or a failure, or the parent's cancellation).
#[derive(Clone, Debug)]
pub struct Scope {
    pub(crate) core: Arc<ScopeCore>,
}

impl Scope {
    pub(crate) fn from_core(core: Arc<ScopeCore>) -> Self {
        Self { core }
    }

    /// Get the scope ID.
    #[inline]
    pub fn id(&self) -> ScopeId {
        self.core.id()
    }

    /// Get the failure discipline.
    #[inline]
    pub fn discipline(&self) -> Discipline {
        self.core.discipline()
    }

    /// Whether the scope has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    /// Number of child tasks that have not reached a terminal state.
    #[inline]
    pub fn active_children(&self) -> usize {
        self.core.live()
    }

    /// The first unhandled child failure, if any.
    #[inline]
    pub fn first_failure(&self) -> Option<Failure> {
        self.core.first_failure()
    }

    /// Failures that arrived after the first and were suppressed.
    #[inline]
    pub fn suppressed_failures(&self) -> Vec<Failure> {
        self.core.suppressed_failures()
    }

    /// Spawn a task with no result.
    pub fn spawn<F>(
        &self,
        context: ExecutionContext,
        start: Start,
        body: F,
    ) -> Result<TaskHandle, SpawnError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let wrapped = Box::pin(async move {
            body.await;
            harness::drain_attached().await
        });
        let core = self.spawn_inner(context, start, wrapped)?;
        Ok(TaskHandle { core })
    }

    /// Spawn a result-bearing task.
    pub fn spawn_async<T, F>(
        &self,
        context: ExecutionContext,
        start: Start,
        body: F,
    ) -> Result<JoinHandle<T>, SpawnError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let cell = Arc::new(ResultCell::new());
        let slot = Arc::clone(&cell);
        let wrapped = Box::pin(async move {
            let value = body.await;
            slot.set(value);
            harness::drain_attached().await
        });
        let core = self.spawn_inner(context, start, wrapped)?;
        Ok(JoinHandle { core, cell })
    }

    fn spawn_inner(
        &self,
        context: ExecutionContext,
        start: Start,
        body: BoxedBody,
    ) -> Result<Arc<TaskCore>, SpawnError> {
        let runtime = Arc::clone(self.core.runtime());
        let binding = context.bind(&runtime);
        let id = runtime.next_task_id();
        let core = TaskCore::new(id, binding, Arc::downgrade(&self.core), runtime, body);
        self.core.register(Arc::clone(&core))?;
        self.core.runtime().record_spawned();
        debug!("{} spawned {id} ({start:?})", self.core.id());
        if start == Start::Eager {
            TaskCore::start(&core);
        }
        Ok(core)
    }

    /// Open a nested scope. Refused once this scope is cancelled.
    pub fn child(
        &self,
        discipline: Discipline,
    ) -> Result<Scope, SpawnError> {
        if self.core.is_cancelled() {
            return Err(SpawnError::ScopeCancelled);
        }
        let core = ScopeCore::new(
            discipline,
            Weak::new(),
            Arc::clone(self.core.runtime()),
        );
        if self.core.add_child_scope(Arc::downgrade(&core)) {
            core.cancel(CancelSource::Parent);
            return Err(SpawnError::ScopeCancelled);
        }
        Ok(Scope::from_core(core))
    }

    /// Request cancellation of this scope and everything beneath it.
    /// Idempotent.
    pub fn cancel(&self) {
        self.core.cancel(CancelSource::Direct);
    }

    /// Suspend until all children are terminal.
    ///
    /// Reports the first propagated failure, or `Cancelled` when the
    /// scope was torn down by its parent; cancellation requested on this
    /// very scope is swallowed here.
    pub fn join(&self) -> ScopeJoin {
        join_core(Arc::clone(&self.core))
    }
}

/// Open a scope bound to the current task.
///
/// The task cannot complete until the scope has drained: if the body
/// returns while children are live the task enters `Completing`, and if
/// the task is cancelled the scope is cancelled with it. A failure the
/// scope propagates after the body returned fails the task.
///
/// # Panics
///
/// Panics when called outside of a task body.
pub fn task_scope(discipline: Discipline) -> Scope {
    let Some(task) = harness::current_task() else {
        panic!("task_scope() called outside of a task body");
    };
    let core = ScopeCore::new(
        discipline,
        Arc::downgrade(&task),
        Arc::clone(task.runtime()),
    );
    task.attach_scope(Arc::clone(&core));
    if task.cancel_requested() {
        core.cancel(CancelSource::Parent);
    }
    Scope::from_core(core)
}
