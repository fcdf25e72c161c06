//! Worker threads: the dispatch loop.
//!
//! A worker pops a ready task from its context's queue and drives it until
//! it suspends or terminates, then discards itself back to the queue wait.
//! Suspension costs the task nothing but bookkeeping; the thread moves on
//! to the next ready task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::RecvTimeoutError;
use tracing::trace;

use super::queue::TaskQueue;
use crate::task::harness;

/// Spawn a worker thread running the dispatch loop.
pub(crate) fn spawn_worker(
    name: String,
    queue: TaskQueue,
    running: Arc<AtomicBool>,
    idle_timeout: Duration,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || worker_loop(&name, &queue, &running, idle_timeout))
        .expect("Failed to spawn worker thread")
}

/// Worker thread main loop.
fn worker_loop(
    name: &str,
    queue: &TaskQueue,
    running: &AtomicBool,
    idle_timeout: Duration,
) {
    trace!("{name} started");
    while running.load(Ordering::SeqCst) {
        match queue.pop_timeout(idle_timeout) {
            Ok(task) => harness::run(&task),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    trace!("{name} stopped");
}
