//! # weft
//!
//! A structured-concurrency task runtime: tasks are owned by scopes,
//! scopes complete only when all of their children have, and failure or
//! cancellation travels along the scope tree instead of leaking.
//!
//! ## Core pieces
//!
//! - [`Runtime`]: worker pool, timer, and `block_on` driver. No globals.
//! - [`Scope`]: owns tasks; [`Discipline::AllFail`] propagates the first
//!   child failure to the siblings, [`Discipline::Isolated`] keeps
//!   failures per-child.
//! - [`TaskHandle`] / [`JoinHandle`]: await completion, request
//!   cancellation.
//! - [`ExecutionContext`]: pooled, single-thread confined, or unconfined
//!   (inline) execution.
//! - [`sync::Mutex`]: async mutual exclusion with strict FIFO handoff.
//! - [`time`]: suspending [`sleep`](time::sleep) and
//!   [`timeout`](time::timeout).
//!
//! Cancellation is cooperative: a cancellation request sets a flag and
//! takes effect at the task's next suspension point, where the runtime
//! drops the suspended body instead of resuming it. A task that never
//! suspends is never interrupted.
//!
//! ## Example
//!
//! ```no_run
//! use weft::{Discipline, ExecutionContext, Runtime, Start};
//!
//! let rt = Runtime::new();
//! let scope = rt.scope(Discipline::AllFail);
//!
//! let sum = scope
//!     .spawn_async(ExecutionContext::Pooled, Start::Eager, async {
//!         1 + 2
//!     })
//!     .unwrap();
//!
//! assert_eq!(rt.block_on(sum).unwrap(), 3);
//! rt.block_on(scope.join()).unwrap();
//! rt.shutdown();
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod scope;
pub mod sync;
pub mod task;
pub mod time;
pub mod util;

pub use config::RuntimeConfig;
pub use context::{ConfinedHandle, ExecutionContext};
pub use error::{Failure, JoinError, SpawnError, TimeoutError};
pub use runtime::Runtime;
pub use scheduler::SchedulerStats;
pub use scope::{task_scope, Discipline, LifecycleScope, Scope, ScopeId};
pub use task::{
    checkpoint, is_cancelled, yield_now, JoinHandle, Start, TaskHandle, TaskId, TaskState,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
