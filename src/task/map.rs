use super::{Ownership, Task};
use deferred_util::sync::Mutex;
use std::sync::Arc;

impl<T: Send + 'static> Task<T> {
    /// Returns a task that completes with `f` applied to this task's result.
    ///
    /// This task is claimed by the returned one: it becomes
    /// [`Weak`](Ownership::Weak) and is kept alive only by the returned
    /// task, which is now the thing an owner has to hold on to. Dropping the
    /// returned task before it completes drops this one too.
    ///
    /// # Panics
    ///
    /// If this task was already subscribed or claimed.
    #[track_caller]
    pub fn map<U, F>(self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let upstream = self.claim(Ownership::Weak);
        let f = Mutex::new(Some(f));
        Task::new(move |done| {
            let Some(f) = f.with_lock(Option::take) else {
                return;
            };
            upstream.subscribe_claimed(move |value| done.complete(f(value)));
        })
    }

    /// Returns a task that runs the task returned by `f`, once this task
    /// completes, and completes with that task's result.
    ///
    /// Both this task and the task returned by `f` are claimed by the
    /// returned task, as described in [`map`](Self::map).
    ///
    /// # Panics
    ///
    /// If this task was already subscribed or claimed, or if `f` returns a
    /// task that was.
    #[track_caller]
    pub fn flat_map<U, F>(self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Task<U> + Send + 'static,
    {
        let upstream = self.claim(Ownership::Weak);
        let f = Mutex::new(Some(f));
        // Owns the second task until it completes or the returned task is
        // dropped.
        let next: Arc<Mutex<Option<Task<U>>>> = Arc::new(Mutex::new(None));
        let on_cancel = next.clone();
        Task::with_cancel(
            move |done| {
                let Some(f) = f.with_lock(Option::take) else {
                    return;
                };
                let next = next.clone();
                upstream.subscribe_claimed(move |value| {
                    let task = f(value).claim(Ownership::Weak);
                    next.with_lock(|slot| *slot = Some(task.clone()));
                    task.subscribe_claimed(move |value| {
                        done.complete(value);
                        drop(next.with_lock(Option::take));
                    });
                });
            },
            move || drop(on_cancel.with_lock(Option::take)),
        )
    }

    /// Returns a task that completes with `()` once this task completes,
    /// discarding its result.
    #[track_caller]
    pub fn discard(self) -> Task<()> {
        self.map(drop)
    }
}
