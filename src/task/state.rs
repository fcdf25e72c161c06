//! Task lifecycle states and the atomic cell that enforces them.
//!
//! The state graph is monotonic: no transition skips or reverses.
//!
//! ```text
//! New ──────► Active ──────► Completing ──► Completed
//!  │            │    └──────────────────────────▲
//!  │            ▼                  │
//!  └──────► Cancelling ◄───────────┘
//!               │
//!               ▼
//!           Cancelled
//! ```
//!
//! A failed task travels the Cancelling → Cancelled edge with a failure
//! recorded in its result slot; `Completed` is reserved for normal
//! completion.

use std::sync::atomic::{AtomicU8, Ordering};

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Task is created but not yet scheduled (eager tasks leave this state
    /// immediately; lazy tasks stay here until started).
    New,
    /// Task body is runnable or running.
    Active,
    /// Task body returned normally; outstanding children are draining.
    Completing,
    /// Cancellation or failure teardown is in progress.
    Cancelling,
    /// Terminal: cancelled or failed.
    Cancelled,
    /// Terminal: completed normally.
    Completed,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::New,
            1 => TaskState::Active,
            2 => TaskState::Completing,
            3 => TaskState::Cancelling,
            4 => TaskState::Cancelled,
            _ => TaskState::Completed,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::New => 0,
            TaskState::Active => 1,
            TaskState::Completing => 2,
            TaskState::Cancelling => 3,
            TaskState::Cancelled => 4,
            TaskState::Completed => 5,
        }
    }

    /// Whether the body may still make progress in this state.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, TaskState::Active | TaskState::Completing)
    }

    /// Whether this state is terminal.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Cancelled | TaskState::Completed)
    }

    /// Whether this state belongs to the cancellation path.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskState::Cancelling | TaskState::Cancelled)
    }

    /// Whether `self → to` is a legal edge of the transition graph.
    pub fn may_transition(
        &self,
        to: TaskState,
    ) -> bool {
        use TaskState::*;
        matches!(
            (*self, to),
            (New, Active)
                | (New, Cancelling)
                | (Active, Completing)
                | (Active, Completed)
                | (Active, Cancelling)
                | (Completing, Completed)
                | (Completing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

/// Atomic task state cell enforcing monotonic transitions.
#[derive(Debug)]
pub struct AtomicState(AtomicU8);

impl AtomicState {
    /// Create a cell in the `New` state.
    #[inline]
    pub fn new() -> Self {
        Self(AtomicU8::new(TaskState::New.as_u8()))
    }

    /// Load the current state.
    #[inline]
    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Attempt the transition `current → to`.
    ///
    /// Returns `true` if the transition was performed. Returns `false` if
    /// another thread already moved the state so that the edge no longer
    /// applies (e.g. two racing teardowns). An edge that is illegal from
    /// *every* reachable state indicates a scheduling fault and is the
    /// caller's responsibility to report.
    pub fn try_advance(
        &self,
        to: TaskState,
    ) -> bool {
        loop {
            let current = self.get();
            if !current.may_transition(to) {
                return false;
            }
            if self
                .0
                .compare_exchange(
                    current.as_u8(),
                    to.as_u8(),
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl Default for AtomicState {
    fn default() -> Self {
        Self::new()
    }
}
