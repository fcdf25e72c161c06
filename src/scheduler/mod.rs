//! Task scheduler: maps ready tasks onto execution contexts.
//!
//! One FIFO ready queue feeds the pooled workers; each confined context
//! gets its own queue and dedicated thread. Unconfined tasks never pass
//! through here - they run inline on whichever thread wakes them.

pub(crate) mod queue;
pub(crate) mod worker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::context::ConfinedHandle;
use crate::task::TaskCore;
use queue::TaskQueue;


/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned.
    pub tasks_spawned: AtomicUsize,
    /// Total tasks completed normally.
    pub tasks_completed: AtomicUsize,
    /// Total tasks that terminated cancelled.
    pub tasks_cancelled: AtomicUsize,
    /// Total tasks that terminated with a failure.
    pub tasks_failed: AtomicUsize,
}

impl SchedulerStats {
    /// Record a spawned task.
    #[inline]
    pub(crate) fn record_spawned(&self) {
        self.tasks_spawned.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a completed task.
    #[inline]
    pub(crate) fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a cancelled task.
    #[inline]
    pub(crate) fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a failed task.
    #[inline]
    pub(crate) fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::SeqCst);
    }

    /// Tasks spawned so far.
    #[inline]
    pub fn spawned(&self) -> usize {
        self.tasks_spawned.load(Ordering::SeqCst)
    }

    /// Tasks completed normally so far.
    #[inline]
    pub fn completed(&self) -> usize {
        self.tasks_completed.load(Ordering::SeqCst)
    }

    /// Tasks cancelled so far.
    #[inline]
    pub fn cancelled(&self) -> usize {
        self.tasks_cancelled.load(Ordering::SeqCst)
    }

    /// Tasks failed so far.
    #[inline]
    pub fn failed(&self) -> usize {
        self.tasks_failed.load(Ordering::SeqCst)
    }

    /// Tasks that have reached a terminal state so far.
    #[inline]
    pub fn terminal(&self) -> usize {
        self.completed() + self.cancelled() + self.failed()
    }
}

/// A confined context's thread and queue.
struct ConfinedWorker {
    handle: ConfinedHandle,
    thread: thread::JoinHandle<()>,
}

/// The scheduler: pooled workers plus the confined-context registry.
pub(crate) struct Scheduler {
    pool_queue: TaskQueue,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    confined: Mutex<Vec<ConfinedWorker>>,
    running: Arc<AtomicBool>,
    stats: Arc<SchedulerStats>,
    config: RuntimeConfig,
}

impl Scheduler {
    /// Create a scheduler and spawn the pooled workers.
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        let pool_queue = TaskQueue::new();
        let running = Arc::new(AtomicBool::new(true));
        let num_workers = config.effective_workers();

        let mut workers = Vec::with_capacity(num_workers);
        for worker_id in 0..num_workers {
            workers.push(worker::spawn_worker(
                format!("weft-worker-{worker_id}"),
                pool_queue.clone(),
                Arc::clone(&running),
                config.idle_timeout(),
            ));
        }
        debug!("scheduler started with {num_workers} pooled workers");

        Self {
            pool_queue,
            workers: Mutex::new(workers),
            confined: Mutex::new(Vec::new()),
            running,
            stats: Arc::new(SchedulerStats::default()),
            config,
        }
    }

    /// Producer handle for the pooled ready queue.
    #[inline]
    pub(crate) fn pool_sender(&self) -> Sender<Arc<TaskCore>> {
        self.pool_queue.sender()
    }

    /// Get the statistics block.
    #[inline]
    pub(crate) fn stats(&self) -> &Arc<SchedulerStats> {
        &self.stats
    }

    /// Number of pooled workers.
    #[inline]
    pub(crate) fn num_workers(&self) -> usize {
        self.config.effective_workers()
    }

    /// Create a confined context backed by one dedicated thread.
    pub(crate) fn confined(
        &self,
        name: &str,
    ) -> ConfinedHandle {
        let queue = TaskQueue::new();
        let thread_name = format!("weft-confined-{name}");
        let thread = worker::spawn_worker(
            thread_name,
            queue.clone(),
            Arc::clone(&self.running),
            self.config.idle_timeout(),
        );
        let handle = ConfinedHandle {
            name: Arc::from(name),
            sender: queue.sender(),
        };
        self.confined.lock().push(ConfinedWorker {
            handle: handle.clone(),
            thread,
        });
        handle
    }

    /// Check if the scheduler is running.
    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all workers and wait for them to exit.
    pub(crate) fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if !self.pool_queue.is_empty() {
            debug!(
                "scheduler shutting down with {} tasks still queued",
                self.pool_queue.len(),
            );
        }
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
        for confined in self.confined.lock().drain(..) {
            debug!("confined context {:?} shutting down", confined.handle.name());
            let _ = confined.thread.join();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
