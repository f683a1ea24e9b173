use crate::task::{Ownership, Task};
use deferred_util::sync::Mutex;
use std::sync::Arc;

#[cfg(test)]
mod tests;

/// Holds the generator of the second task of a sequence, and the task it
/// generated, so that the generator runs at most once.
struct Cache<F, U> {
    state: Mutex<CacheState<F, U>>,
}

struct CacheState<F, U> {
    waiter: Option<F>,
    task: Option<Task<U>>,
    cancelled: bool,
}

impl<T: Send + 'static> Task<T> {
    /// Returns a task that, once this task completes, runs the task returned
    /// by `waiter` and completes with both results.
    ///
    /// `waiter` is called at most once, after this task produced its value.
    ///
    /// This task is claimed by the returned one but stays
    /// [`SelfRetained`](Ownership::SelfRetained): once started, it always
    /// runs to completion. The task returned by `waiter` is claimed as
    /// [`Weak`](Ownership::Weak), so dropping the returned task stops
    /// waiting for it, and `waiter` is never called if the returned task was
    /// dropped before this one completed.
    ///
    /// # Panics
    ///
    /// If this task was already subscribed or claimed, or if `waiter` returns
    /// a task that was.
    #[track_caller]
    pub fn and_then<U, F>(self, waiter: F) -> Task<(T, U)>
    where
        U: Send + 'static,
        F: FnOnce(&T) -> Task<U> + Send + 'static,
    {
        let first = self.claim(Ownership::SelfRetained);
        let cache = Arc::new(Cache::new(waiter));
        let on_cancel = cache.clone();
        let first_id = first.id();
        Task::with_cancel(
            move |done| {
                let cache = cache.clone();
                first.subscribe_claimed(move |value| {
                    let Some(second) = cache.get_or_generate(&value) else {
                        tracing::debug!(
                            task.id = %done.task_id(),
                            first.id = %first_id,
                            "sequence dropped before its second task was generated"
                        );
                        return;
                    };
                    let release = cache.clone();
                    second.subscribe_claimed(move |next| {
                        done.complete((value, next));
                        release.release();
                    });
                });
            },
            move || on_cancel.cancel(),
        )
    }

    /// Returns a task that, once this task completes, runs the task returned
    /// by `waiter` and completes with its result.
    ///
    /// This is [`and_then`](Self::and_then) without the first result.
    #[track_caller]
    pub fn then<U, F>(self, waiter: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(&T) -> Task<U> + Send + 'static,
    {
        self.and_then(waiter).map(|(_, next)| next)
    }
}

// === impl Cache ===

impl<F, U: Send + 'static> Cache<F, U> {
    fn new(waiter: F) -> Self {
        Self {
            state: Mutex::new(CacheState {
                waiter: Some(waiter),
                task: None,
                cancelled: false,
            }),
        }
    }

    /// Returns the cached task, generating it first if this is the first
    /// request. Returns `None` once the cache was cancelled.
    fn get_or_generate<T>(&self, value: &T) -> Option<Task<U>>
    where
        F: FnOnce(&T) -> Task<U>,
    {
        let waiter = self.state.with_lock(|state| match state.task {
            Some(ref task) => Ok(task.clone()),
            None => Err(state.waiter.take()),
        });
        let waiter = match waiter {
            Ok(task) => return Some(task),
            Err(waiter) => waiter?,
        };

        let task = waiter(value).claim(Ownership::Weak);
        let cached = self.state.with_lock(|state| {
            if state.cancelled {
                return false;
            }
            state.task = Some(task.clone());
            true
        });
        cached.then_some(task)
    }

    /// Drops the cached task after it completed.
    fn release(&self) {
        drop(self.state.with_lock(|state| state.task.take()));
    }

    /// Drops the generator and the cached task, if they are still around.
    fn cancel(&self) {
        let (waiter, task) = self.state.with_lock(|state| {
            state.cancelled = true;
            (state.waiter.take(), state.task.take())
        });
        if let Some(ref task) = task {
            tracing::trace!(
                task.id = %task.id(),
                "releasing the second task of a dropped sequence"
            );
        }
        drop((waiter, task));
    }
}
