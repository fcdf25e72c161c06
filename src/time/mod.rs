//! Timers: suspending sleeps and deadline enforcement.
//!
//! A single driver thread owns a min-heap of deadlines and fires wakers
//! as they come due. Sleeping suspends the task; worker threads are
//! never blocked on time.

pub mod sleep;
pub mod timeout;

pub use sleep::{sleep, Sleep};
pub use timeout::timeout;

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::time::sleep::SleepShared;

#[cfg(test)]
mod tests;

struct TimerEntry {
    deadline: Instant,
    shared: Arc<SleepShared>,
}

impl PartialEq for TimerEntry {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(
        &self,
        other: &Self,
    ) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

struct DriverState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    shutdown: bool,
}

/// Owns the timer thread. One per runtime, created on first use.
pub(crate) struct TimerDriver {
    state: Arc<(Mutex<DriverState>, Condvar)>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TimerDriver {
    pub(crate) fn new() -> Self {
        let state = Arc::new((
            Mutex::new(DriverState {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let driver_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("weft-timer".to_string())
            .spawn(move || driver_loop(driver_state))
            .expect("Failed to spawn timer thread");
        debug!("timer driver started");
        Self {
            state,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Schedule `shared` to fire at `deadline`.
    pub(crate) fn register(
        &self,
        deadline: Instant,
        shared: Arc<SleepShared>,
    ) {
        let (lock, cvar) = &*self.state;
        let mut state = lock.lock();
        state.heap.push(Reverse(TimerEntry { deadline, shared }));
        cvar.notify_one();
    }

    pub(crate) fn shutdown(&self) {
        let (lock, cvar) = &*self.state;
        {
            let mut state = lock.lock();
            state.shutdown = true;
            cvar.notify_one();
        }
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn driver_loop(state: Arc<(Mutex<DriverState>, Condvar)>) {
    let (lock, cvar) = &*state;
    loop {
        // Wakers may resume a task inline on this thread, so fire them
        // only after the heap lock is released.
        let mut due: Vec<Arc<SleepShared>> = Vec::new();
        let mut guard = lock.lock();
        if guard.shutdown {
            // Fire everything left so no sleeper hangs past shutdown.
            while let Some(Reverse(entry)) = guard.heap.pop() {
                due.push(entry.shared);
            }
            drop(guard);
            for shared in due {
                shared.fire();
            }
            debug!("timer driver stopped");
            return;
        }
        let now = Instant::now();
        loop {
            let next = match guard.heap.peek() {
                Some(Reverse(entry)) if entry.deadline <= now => guard.heap.pop(),
                _ => None,
            };
            match next {
                Some(Reverse(entry)) => due.push(entry.shared),
                None => break,
            }
        }
        if !due.is_empty() {
            drop(guard);
            for shared in due {
                shared.fire();
            }
            continue;
        }
        match guard.heap.peek() {
            Some(Reverse(entry)) => {
                let deadline = entry.deadline;
                let _ = cvar.wait_until(&mut guard, deadline);
            }
            None => cvar.wait(&mut guard),
        }
    }
}
