//! Deadline enforcement around a piece of work.

use std::future::Future;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::error::{JoinError, TimeoutError};
use crate::scope::{Discipline, Scope};
use crate::task::Start;
use crate::time::sleep;

/// Run `body` with a deadline, inside `scope`.
///
/// The work runs as a task on `context` in an isolated child scope with
/// a watchdog beside it; if the deadline passes first the watchdog
/// cancels the child scope, which cancels the work cooperatively at its
/// next suspension point. Already-elapsed work is never interrupted
/// after it commits its result. The watchdog always runs pooled so the
/// deadline fires even when `context` is a saturated confined thread.
///
/// Returns the work's value, [`TimeoutError::Elapsed`] when the deadline
/// won, or [`TimeoutError::Failed`] when the work itself failed.
pub async fn timeout<T, F>(
    scope: &Scope,
    context: ExecutionContext,
    duration: Duration,
    body: F,
) -> Result<T, TimeoutError>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    // Isolated so the watchdog's cancellation of the work (and vice
    // versa) never re-raises at the sub-scope's join.
    let sub = scope
        .child(Discipline::Isolated)
        .map_err(|e| TimeoutError::Failed(crate::error::Failure::new(e.to_string())))?;
    let work = sub
        .spawn_async(context, Start::Eager, body)
        .map_err(|e| TimeoutError::Failed(crate::error::Failure::new(e.to_string())))?;
    let watchdog_scope = sub.clone();
    let watchdog = sub.spawn(ExecutionContext::Pooled, Start::Eager, async move {
        sleep(duration).await;
        watchdog_scope.cancel();
    });
    let result = match work.await {
        Ok(value) => Ok(value),
        Err(JoinError::Cancelled) => Err(TimeoutError::Elapsed),
        Err(JoinError::Failed(failure)) => Err(TimeoutError::Failed(failure)),
    };
    // Work finished first: retire the watchdog instead of waiting out
    // its clock.
    if let Ok(watchdog) = watchdog {
        watchdog.cancel();
    }
    sub.cancel();
    let _ = sub.join().await;
    result
}
