//! Ready queue for an execution context.
//!
//! Multi-producer, multi-consumer FIFO over a crossbeam channel: wakers
//! push from any thread, workers pop. FIFO order per context is the only
//! fairness guarantee the runtime makes.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::task::TaskCore;

/// A thread-safe ready queue supporting multiple producers and consumers.
#[derive(Debug, Clone)]
pub(crate) struct TaskQueue {
    tx: Sender<Arc<TaskCore>>,
    rx: Receiver<Arc<TaskCore>>,
}

impl TaskQueue {
    /// Create a new empty queue.
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Producer side, for context bindings.
    #[inline]
    pub(crate) fn sender(&self) -> Sender<Arc<TaskCore>> {
        self.tx.clone()
    }

    /// Pop the next ready task, waiting up to `timeout`.
    #[inline]
    pub(crate) fn pop_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<TaskCore>, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Number of queued tasks.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether the queue is empty.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
