//! Waiting for a task's result on the calling thread.
//!
//! This is the only part of the crate that blocks. Timing out never cancels
//! the task being waited on: it keeps running to completion, and its result
//! is discarded.
use crate::task::Task;
use deferred_util::sync::{Latch, Mutex};
use std::{sync::Arc, time::Duration};


/// An error indicating that [`try_sync`] gave up waiting for a task.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("task did not complete within {0:?}")]
pub struct Elapsed(Duration);

/// Subscribes to `task` and blocks the calling thread until it completes,
/// returning its result.
///
/// If `timeout` is `Some` and elapses first, the value returned by `fallback`
/// is returned instead.
///
/// # Panics
///
/// - If `timeout` is zero.
/// - If `task` was already subscribed or claimed by a composite.
#[track_caller]
pub fn sync<T, F>(task: Task<T>, timeout: Option<Duration>, fallback: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
{
    try_sync(task, timeout).unwrap_or_else(|_| fallback())
}

/// Subscribes to `task` and blocks the calling thread until it completes,
/// returning its result, or an [`Elapsed`] error if `timeout` elapsed first.
///
/// The task is made [`SelfRetained`](crate::Ownership::SelfRetained) before
/// it is subscribed, so it keeps running even if this returns early.
///
/// # Panics
///
/// - If `timeout` is zero.
/// - If `task` was already subscribed or claimed by a composite.
#[track_caller]
pub fn try_sync<T>(task: Task<T>, timeout: Option<Duration>) -> Result<T, Elapsed>
where
    T: Send + 'static,
{
    if let Some(timeout) = timeout {
        assert!(
            !timeout.is_zero(),
            "a blocking wait on task {} must have a non-zero timeout",
            task.id()
        );
    }

    let latch = Arc::new(Latch::new());
    let result = Arc::new(Mutex::new(None));
    let task = task.strongify();
    let id = task.id();

    latch.enter();
    {
        let latch = latch.clone();
        let result = result.clone();
        task.subscribe(move |value| {
            result.with_lock(|result| *result = Some(value));
            latch.leave();
        });
    }
    drop(task);

    match timeout {
        None => latch.wait(),
        Some(timeout) if !latch.wait_timeout(timeout) => {
            tracing::debug!(task.id = %id, ?timeout, "gave up waiting for task");
            return Err(Elapsed(timeout));
        }
        Some(_) => {}
    }

    match result.with_lock(Option::take) {
        Some(value) => Ok(value),
        None => unreachable!("the latch opens only once the result was stored"),
    }
}

// === impl Elapsed ===

impl Elapsed {
    /// Returns the timeout that elapsed.
    #[must_use]
    pub fn duration(self) -> Duration {
        self.0
    }
}

impl From<Elapsed> for Duration {
    #[inline]
    fn from(Elapsed(duration): Elapsed) -> Self {
        duration
    }
}
