//! Error taxonomy for the runtime.
//!
//! Three families of conditions exist:
//!
//! - Application failures ([`Failure`]): the task body panicked, or a child
//!   of a completing task failed. In an all-fail scope the first failure
//!   cancels the siblings and re-raises once at the scope's join point.
//! - Cancellation: cooperative teardown. Not a failure; awaiters observe it
//!   as [`JoinError::Cancelled`].
//! - Scheduling faults: internal invariant violations. These are runtime
//!   bugs and abort the affected worker thread via panic rather than being
//!   surfaced as recoverable values.

use std::any::Any;

use thiserror::Error;

/// An application failure raised by a task body.
///
/// Captured from a panic payload or propagated from a failed child scope.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Failure {
    /// Human-readable failure description.
    message: String,
}

impl Failure {
    /// Create a failure with the given message.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build a failure from a caught panic payload.
    ///
    /// `&str` and `String` payloads keep their message; anything else is
    /// reported as an opaque panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task body panicked".to_string()
        };
        Self { message }
    }

    /// Get the failure message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Condition observed when awaiting a task or joining a scope.
#[derive(Debug, Clone, Error)]
pub enum JoinError {
    /// The task (or a child of the scope) failed.
    #[error("task failed: {0}")]
    Failed(Failure),
    /// The task or scope was cancelled before completing normally.
    #[error("task was cancelled")]
    Cancelled,
}

impl JoinError {
    /// Whether this condition is a cancellation (cooperative teardown).
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JoinError::Cancelled)
    }

    /// Get the failure payload, if any.
    #[inline]
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            JoinError::Failed(f) => Some(f),
            JoinError::Cancelled => None,
        }
    }
}

/// Error returned when a spawn request is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpawnError {
    /// The target scope is cancelled and refuses new child registration.
    #[error("scope is cancelled and refuses new children")]
    ScopeCancelled,
    /// The runtime is shutting down.
    #[error("runtime is shut down")]
    RuntimeShutdown,
}

/// Error returned by [`timeout`](crate::time::timeout).
#[derive(Debug, Clone, Error)]
pub enum TimeoutError {
    /// The deadline elapsed before the timed operation completed.
    #[error("operation timed out")]
    Elapsed,
    /// The timed operation itself failed.
    #[error("timed operation failed: {0}")]
    Failed(Failure),
}

/// Error loading a [`RuntimeConfig`](crate::config::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    /// An environment override had an invalid value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// Rejected value.
        value: String,
    },
}
