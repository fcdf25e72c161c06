//! Suspending sleep.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::task::harness;

/// Shared between a [`Sleep`] future and the timer driver.
pub(crate) struct SleepShared {
    fired: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl SleepShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: AtomicBool::new(false),
            waker: Mutex::new(None),
        })
    }

    /// Called by the driver when the deadline passes.
    pub(crate) fn fire(&self) {
        // The flag is set before the waker is taken, so a concurrent poll
        // either sees fired or gets its waker picked up here.
        self.fired.store(true, Ordering::SeqCst);
        let waker = self.waker.lock().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn set_waker(
        &self,
        waker: &Waker,
    ) {
        *self.waker.lock() = Some(waker.clone());
    }
}

/// Suspend the current task for at least `duration`.
///
/// A cooperative suspension point: if the task has been cancelled, the
/// sleep resolves without waiting.
pub fn sleep(duration: Duration) -> Sleep {
    Sleep {
        deadline: Instant::now() + duration,
        shared: None,
    }
}

/// Future returned by [`sleep`].
pub struct Sleep {
    deadline: Instant,
    /// Present once registered with the driver.
    shared: Option<Arc<SleepShared>>,
}

impl Future for Sleep {
    type Output = ();

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        // Cancellation must not wait out the clock.
        if harness::current_task().is_some_and(|t| t.cancel_requested()) {
            return Poll::Ready(());
        }
        match &self.shared {
            Some(shared) => {
                if shared.is_fired() {
                    return Poll::Ready(());
                }
                shared.set_waker(cx.waker());
                if shared.is_fired() {
                    return Poll::Ready(());
                }
                Poll::Pending
            }
            None => {
                if Instant::now() >= self.deadline {
                    return Poll::Ready(());
                }
                let Some(runtime) = harness::current_runtime() else {
                    panic!("sleep() polled outside of a runtime");
                };
                let shared = SleepShared::new();
                shared.set_waker(cx.waker());
                runtime.timer().register(self.deadline, Arc::clone(&shared));
                self.shared = Some(shared);
                Poll::Pending
            }
        }
    }
}
