//! Execution contexts: where a task's body runs.
//!
//! A closed set of three kinds, per the runtime's scheduling model:
//!
//! - [`ExecutionContext::Pooled`]: the runtime's fixed-size worker pool.
//! - [`ExecutionContext::Confined`]: one dedicated thread; every poll of
//!   the task happens there.
//! - [`ExecutionContext::Unconfined`]: the first poll runs inline on the
//!   spawning (or starting) thread until the first suspension; after that,
//!   each resumption runs inline on whichever thread triggered it. No
//!   thread affinity.
//!
//! A task's binding is fixed at spawn; rebinding only ever happens at a
//! suspension point, because that is the only time the body is parked.

use std::sync::Arc;

use crossbeam::channel::Sender;
use tracing::warn;

use crate::runtime::RuntimeShared;
use crate::task::{harness, TaskCore};

/// Selects where a spawned task runs.
#[derive(Clone, Debug, Default)]
pub enum ExecutionContext {
    /// The runtime's shared worker pool.
    #[default]
    Pooled,
    /// A single dedicated thread, created via
    /// [`Runtime::confined`](crate::runtime::Runtime::confined).
    Confined(ConfinedHandle),
    /// Run inline on the calling thread until the first suspension.
    Unconfined,
}

impl ExecutionContext {
    /// Resolve to a dispatch binding against the given runtime.
    pub(crate) fn bind(
        &self,
        runtime: &RuntimeShared,
    ) -> Binding {
        match self {
            ExecutionContext::Pooled => Binding::Queue(runtime.scheduler().pool_sender()),
            ExecutionContext::Confined(handle) => Binding::Queue(handle.sender.clone()),
            ExecutionContext::Unconfined => Binding::Inline,
        }
    }
}

/// Handle to a confined (single-thread) execution context.
#[derive(Clone)]
pub struct ConfinedHandle {
    pub(crate) name: Arc<str>,
    pub(crate) sender: Sender<Arc<TaskCore>>,
}

impl ConfinedHandle {
    /// Name of the backing thread.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ConfinedHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConfinedHandle")
            .field("name", &self.name)
            .finish()
    }
}

/// Resolved dispatch target for one task.
#[derive(Clone)]
pub(crate) enum Binding {
    /// FIFO ready queue of a pooled or confined context.
    Queue(Sender<Arc<TaskCore>>),
    /// Run on the current thread, immediately.
    Inline,
}

impl Binding {
    /// Hand a runnable task to its execution context.
    pub(crate) fn dispatch(
        &self,
        core: Arc<TaskCore>,
    ) {
        match self {
            Binding::Queue(sender) => {
                if let Err(err) = sender.send(core) {
                    warn!("dropping wakeup for {}: context is shut down", err.0.id());
                }
            }
            Binding::Inline => harness::run(&core),
        }
    }
}
