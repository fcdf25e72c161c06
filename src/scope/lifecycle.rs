//! Scope tied to an owner with an explicit close point.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::scope::{CancelSource, Scope};

/// A [`Scope`] whose lifetime follows some owning object.
///
/// Created via [`Runtime::lifecycle_scope`](crate::runtime::Runtime::lifecycle_scope)
/// and stored on the owner; when the owner shuts down it calls [`close`],
/// which cancels everything still running in the scope. Dropping the
/// handle without closing it closes it too, so work cannot leak past the
/// owner's lifetime.
///
/// [`close`]: LifecycleScope::close
#[derive(Debug)]
pub struct LifecycleScope {
    scope: Scope,
    closed: AtomicBool,
}

impl LifecycleScope {
    pub(crate) fn new(scope: Scope) -> Self {
        Self {
            scope,
            closed: AtomicBool::new(false),
        }
    }

    /// The underlying scope, for spawning.
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether [`close`](LifecycleScope::close) has run.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Cancel the scope and everything in it. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("{} lifecycle closed", self.scope.id());
        self.scope.core.cancel(CancelSource::Direct);
    }
}

impl Drop for LifecycleScope {
    fn drop(&mut self) {
        self.close();
    }
}
