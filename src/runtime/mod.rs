//! The runtime: owns the scheduler, the timer, and identifier allocation.
//!
//! There is no global runtime and no ambient root scope. Construct a
//! [`Runtime`], open scopes from it, and drive a root future with
//! [`Runtime::block_on`]. Shutdown is explicit (or on drop) and stops the
//! worker pool and the timer thread.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::config::RuntimeConfig;
use crate::context::ConfinedHandle;
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::scope::{Discipline, LifecycleScope, Scope, ScopeCore, ScopeId};
use crate::task::{harness, Outcome, TaskId, TaskIdGenerator};
use crate::time::TimerDriver;


/// State shared by every task, scope, and handle of one runtime.
pub(crate) struct RuntimeShared {
    config: RuntimeConfig,
    scheduler: Scheduler,
    /// Created lazily on the first sleep or timeout.
    timer: OnceCell<TimerDriver>,
    task_ids: TaskIdGenerator,
    scope_ids: AtomicU64,
}

impl RuntimeShared {
    fn new(config: RuntimeConfig) -> Arc<Self> {
        let scheduler = Scheduler::new(config.clone());
        Arc::new(Self {
            config,
            scheduler,
            timer: OnceCell::new(),
            task_ids: TaskIdGenerator::new(),
            scope_ids: AtomicU64::new(1),
        })
    }

    #[inline]
    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn timer(&self) -> &TimerDriver {
        self.timer.get_or_init(TimerDriver::new)
    }

    #[inline]
    pub(crate) fn next_task_id(&self) -> TaskId {
        self.task_ids.next()
    }

    #[inline]
    pub(crate) fn next_scope_id(&self) -> ScopeId {
        ScopeId(self.scope_ids.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn record_spawned(&self) {
        if self.config.enable_stats {
            self.scheduler.stats().record_spawned();
        }
    }

    pub(crate) fn record_terminal(
        &self,
        outcome: &Outcome,
    ) {
        if !self.config.enable_stats {
            return;
        }
        let stats = self.scheduler.stats();
        match outcome {
            Outcome::Success => stats.record_completed(),
            Outcome::Cancelled => stats.record_cancelled(),
            Outcome::Failed(_) => stats.record_failed(),
        }
    }
}

/// A structured-concurrency runtime.
///
/// ```no_run
/// use weft::{Discipline, ExecutionContext, Runtime, Start};
///
/// let rt = Runtime::new();
/// let scope = rt.scope(Discipline::AllFail);
/// let handle = scope
///     .spawn_async(ExecutionContext::Pooled, Start::Eager, async { 41 + 1 })
///     .unwrap();
/// let value = rt.block_on(handle).unwrap();
/// assert_eq!(value, 42);
/// rt.shutdown();
/// ```
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    /// Create a runtime with default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        info!(
            "runtime starting: {} workers, stats {}",
            config.effective_workers(),
            if config.enable_stats { "on" } else { "off" },
        );
        Self {
            shared: RuntimeShared::new(config),
        }
    }

    /// Open a top-level scope with the given discipline.
    pub fn scope(
        &self,
        discipline: Discipline,
    ) -> Scope {
        let core = ScopeCore::new(
            discipline,
            Weak::new(),
            Arc::clone(&self.shared),
        );
        debug!("{} opened ({discipline:?})", core.id());
        Scope::from_core(core)
    }

    /// Open a scope tied to an owning object's lifetime.
    ///
    /// Dropping (or closing) the returned handle cancels everything
    /// still running in it.
    pub fn lifecycle_scope(
        &self,
        discipline: Discipline,
    ) -> LifecycleScope {
        LifecycleScope::new(self.scope(discipline))
    }

    /// Start a dedicated single-threaded execution context.
    ///
    /// Every task bound to the returned handle runs on that one thread,
    /// in FIFO order.
    pub fn confined(
        &self,
        name: &str,
    ) -> ConfinedHandle {
        self.shared.scheduler.confined(name)
    }

    /// Scheduler counters. All zero unless stats are enabled in the
    /// configuration.
    pub fn stats(&self) -> &Arc<SchedulerStats> {
        self.shared.scheduler.stats()
    }

    /// Number of pool worker threads.
    pub fn num_workers(&self) -> usize {
        self.shared.scheduler.num_workers()
    }

    /// Drive a future on the calling thread until it completes.
    ///
    /// The calling thread parks between polls; tasks the future awaits
    /// run on the runtime's workers as usual.
    pub fn block_on<F: Future>(
        &self,
        future: F,
    ) -> F::Output {
        let parker = Arc::new(Parker::new());
        let waker = Waker::from(Arc::clone(&parker));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future);
        let ctx_guard = harness::enter(harness::CurrentCtx {
            runtime: Arc::clone(&self.shared),
            task: None,
        });
        let output = loop {
            match future.as_mut().poll(&mut cx) {
                Poll::Ready(output) => break output,
                Poll::Pending => parker.park(),
            }
        };
        drop(ctx_guard);
        output
    }

    /// Stop the worker pool, confined contexts, and timer. Idempotent.
    ///
    /// Already-queued tasks may still be drained by workers mid-loop;
    /// new spawns are refused with
    /// [`SpawnError::RuntimeShutdown`](crate::error::SpawnError::RuntimeShutdown).
    pub fn shutdown(&self) {
        if let Some(timer) = self.shared.timer.get() {
            timer.shutdown();
        }
        self.shared.scheduler.shutdown();
        info!("runtime stopped");
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.num_workers())
            .finish_non_exhaustive()
    }
}

/// Thread parker used by [`Runtime::block_on`].
struct Parker {
    notified: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    fn new() -> Self {
        Self {
            notified: Mutex::new(false),
            cvar: Condvar::new(),
        }
    }

    fn park(&self) {
        let mut notified = self.notified.lock();
        while !*notified {
            self.cvar.wait(&mut notified);
        }
        *notified = false;
    }

    fn unpark(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.cvar.notify_one();
    }
}

impl Wake for Parker {
    fn wake(self: Arc<Self>) {
        self.unpark();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.unpark();
    }
}
