//! Async mutex with strict FIFO handoff.
//!
//! Unlike a thread mutex, waiting suspends the task instead of blocking
//! the worker thread, so a worker whose task is parked on the lock keeps
//! executing other tasks. Release hands the lock directly to the oldest
//! waiter; a task that starts waiting later can never overtake one that
//! started earlier, at the cost of lock throughput under contention.
//!
//! The guard is not tied to a thread. A task may acquire on one worker,
//! suspend, and release on another.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Lock word plus the FIFO wait queue.
struct LockState {
    locked: bool,
    /// Waiting acquirers, oldest first.
    queue: VecDeque<(u64, Waker)>,
    /// Ticket the lock was handed to on release, not yet picked up.
    handoff: Option<u64>,
    next_ticket: u64,
}

/// Async mutual exclusion with FIFO fairness.
pub struct Mutex<T: ?Sized> {
    state: parking_lot::Mutex<LockState>,
    value: UnsafeCell<T>,
}

// The value moves between tasks with the guard, never aliased: access
// requires holding the logical lock.
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Create an unlocked mutex.
    pub fn new(value: T) -> Self {
        Self {
            state: parking_lot::Mutex::new(LockState {
                locked: false,
                queue: VecDeque::new(),
                handoff: None,
                next_ticket: 0,
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Consume the mutex, returning the value.
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquire the lock, suspending while another task holds it.
    pub fn lock(&self) -> Acquire<'_, T> {
        Acquire {
            mutex: self,
            ticket: None,
        }
    }

    /// Acquire without suspending, if the lock is free and no one is
    /// waiting.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked || state.handoff.is_some() || !state.queue.is_empty() {
            return None;
        }
        state.locked = true;
        Some(MutexGuard { mutex: self })
    }

    /// Run `f` with the lock held.
    pub async fn with_lock<R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        let mut guard = self.lock().await;
        f(&mut guard)
    }

    /// Exclusive access through a mutable reference, no locking needed.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn unlock(&self) {
        let woken = {
            let mut state = self.state.lock();
            match state.queue.pop_front() {
                Some((ticket, waker)) => {
                    // Direct handoff: the lock stays held and belongs to
                    // `ticket`, so no later acquirer can slip in between.
                    state.handoff = Some(ticket);
                    Some(waker)
                }
                None => {
                    state.locked = false;
                    None
                }
            }
        };
        if let Some(waker) = woken {
            waker.wake();
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for Mutex<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mutex")
            .field("locked", &state.locked)
            .field("waiters", &state.queue.len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Mutex::lock`].
pub struct Acquire<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    /// Queue position once this acquirer has started waiting.
    ticket: Option<u64>,
}

impl<'a, T: ?Sized> Future for Acquire<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let mut state = self.mutex.state.lock();
        match self.ticket {
            None => {
                if !state.locked && state.handoff.is_none() && state.queue.is_empty() {
                    state.locked = true;
                    return Poll::Ready(MutexGuard { mutex: self.mutex });
                }
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.queue.push_back((ticket, cx.waker().clone()));
                self.ticket = Some(ticket);
                Poll::Pending
            }
            Some(ticket) => {
                if state.handoff == Some(ticket) {
                    state.handoff = None;
                    self.ticket = None;
                    return Poll::Ready(MutexGuard { mutex: self.mutex });
                }
                // Spurious poll: refresh the stored waker in place, keep
                // the queue position.
                for entry in state.queue.iter_mut() {
                    if entry.0 == ticket {
                        entry.1.clone_from(cx.waker());
                        break;
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T: ?Sized> Drop for Acquire<'_, T> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket else {
            return;
        };
        let mut state = self.mutex.state.lock();
        if state.handoff == Some(ticket) {
            // The lock was handed to us but never picked up (the waiting
            // task was cancelled). Pass it on so it is not lost.
            state.handoff = None;
            drop(state);
            // locked is still true; release as if we held the guard.
            self.mutex.unlock();
            return;
        }
        state.queue.retain(|(t, _)| *t != ticket);
    }
}

/// RAII lock guard; releases on drop, handing off to the oldest waiter.
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for MutexGuard<'_, T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}
