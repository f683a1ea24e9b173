//! Stateless rewiring of a task's output type.
//!
//! Everything in this module is a direct application of [`Task::map`], so the
//! ownership rules described there apply: the receiver is claimed by the
//! returned task.
use crate::task::Task;


/// A type-erased error, produced by [`Task::try_map`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// === optional values ===

impl<T: Send + 'static> Task<Option<T>> {
    /// Returns a task that completes with this task's value, or with
    /// `default` if it produced `None`.
    #[track_caller]
    pub fn unwrap_or(self, default: T) -> Task<T> {
        self.map(move |value| value.unwrap_or(default))
    }

    /// Returns a task that completes with this task's value, or with the
    /// value returned by `f` if it produced `None`.
    #[track_caller]
    pub fn unwrap_or_else<F>(self, f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.map(move |value| value.unwrap_or_else(f))
    }
}

impl<T: Send + 'static> Task<Vec<Option<T>>> {
    /// Returns a task that completes with every `Some` value this task
    /// produced, in order.
    #[track_caller]
    pub fn filter_nils(self) -> Task<Vec<T>> {
        self.map(|values| values.into_iter().flatten().collect())
    }
}

// === results ===

impl<T, E> Task<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Returns a task that succeeds with `value`.
    pub fn success(value: T) -> Self {
        Self::ready(Ok(value))
    }

    /// Returns a task that fails with `error`.
    pub fn failure(error: E) -> Self {
        Self::ready(Err(error))
    }

    /// Subscribes to this task, calling `on_ok` if it succeeds and `on_err` if
    /// it fails.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed, or was claimed by a composite.
    #[track_caller]
    pub fn on_result<S, F>(&self, on_ok: S, on_err: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        self.subscribe(move |result| match result {
            Ok(value) => on_ok(value),
            Err(error) => on_err(error),
        })
    }

    /// Returns a task that applies `f` to this task's success value.
    #[track_caller]
    pub fn map_ok<U, F>(self, f: F) -> Task<Result<U, E>>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map(move |result| result.map(f))
    }

    /// Returns a task that applies `f` to this task's error.
    #[track_caller]
    pub fn map_err<E2, F>(self, f: F) -> Task<Result<T, E2>>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.map(move |result| result.map_err(f))
    }

    /// Returns a task that applies the fallible `f` to this task's success
    /// value.
    ///
    /// Both this task's error and an error returned by `f` become a
    /// [`BoxError`]. `f` is not called if this task failed.
    #[track_caller]
    pub fn try_map<U, X, F>(self, f: F) -> Task<Result<U, BoxError>>
    where
        U: Send + 'static,
        E: Into<BoxError>,
        X: Into<BoxError>,
        F: FnOnce(T) -> Result<U, X> + Send + 'static,
    {
        self.map(move |result| match result {
            Ok(value) => f(value).map_err(Into::into),
            Err(error) => Err(error.into()),
        })
    }

    /// Returns a task that completes with the success value, or with `value`
    /// if this task failed.
    #[track_caller]
    pub fn recover_with(self, value: T) -> Task<T> {
        self.map(move |result| result.unwrap_or(value))
    }

    /// Returns a task that completes with the success value, or with the
    /// value returned by `f` if this task failed.
    #[track_caller]
    pub fn recover<F>(self, f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.map(move |result| result.unwrap_or_else(|_| f()))
    }

    /// Returns a task that completes with the success value, or with `f`
    /// applied to the error if this task failed.
    #[track_caller]
    pub fn recover_err<F>(self, f: F) -> Task<T>
    where
        F: FnOnce(E) -> T + Send + 'static,
    {
        self.map(move |result| result.unwrap_or_else(f))
    }

    /// Returns a task that completes with `Some` success value, or `None` if
    /// this task failed.
    #[track_caller]
    pub fn ok(self) -> Task<Option<T>> {
        self.map(Result::ok)
    }

    /// Adds a hook that observes the success value before the completion
    /// callback runs. See [`Task::before_complete`].
    #[must_use]
    #[track_caller]
    pub fn before_success<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.before_complete(move |result| {
            if let Ok(value) = result {
                f(value)
            }
        })
    }

    /// Adds a hook that observes the error before the completion callback
    /// runs. See [`Task::before_complete`].
    #[must_use]
    #[track_caller]
    pub fn before_fail<F>(self, f: F) -> Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.before_complete(move |result| {
            if let Err(error) = result {
                f(error)
            }
        })
    }

    /// Adds a hook that observes the success value after the completion
    /// callback ran. See [`Task::after_complete`].
    #[must_use]
    #[track_caller]
    pub fn after_success<F>(self, f: F) -> Self
    where
        T: Clone,
        E: Clone,
        F: FnOnce(&T) + Send + 'static,
    {
        self.after_complete(move |result| {
            if let Ok(value) = result {
                f(value)
            }
        })
    }

    /// Adds a hook that observes the error after the completion callback
    /// ran. See [`Task::after_complete`].
    #[must_use]
    #[track_caller]
    pub fn after_fail<F>(self, f: F) -> Self
    where
        T: Clone,
        E: Clone,
        F: FnOnce(&E) + Send + 'static,
    {
        self.after_complete(move |result| {
            if let Err(error) = result {
                f(error)
            }
        })
    }
}

impl<T, E> Task<Result<Vec<T>, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Returns a task that applies `f` to every success value, keeping the
    /// `Some` results.
    #[track_caller]
    pub fn compact_map<U, F>(self, f: F) -> Task<Result<Vec<U>, E>>
    where
        U: Send + 'static,
        F: FnMut(T) -> Option<U> + Send + 'static,
    {
        self.map(move |result| result.map(|values| values.into_iter().filter_map(f).collect()))
    }
}

impl<T, E> Task<Result<Vec<Option<T>>, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Returns a task that keeps only the `Some` success values, in order.
    #[track_caller]
    pub fn filter_nils_ok(self) -> Task<Result<Vec<T>, E>> {
        self.map(|result| result.map(|values| values.into_iter().flatten().collect()))
    }
}

impl<T, E> Task<Result<Option<T>, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Returns a task that succeeds with the success value, or with `default`
    /// if it was `None`.
    #[track_caller]
    pub fn unwrap_ok_or(self, default: T) -> Task<Result<T, E>> {
        self.map(move |result| result.map(|value| value.unwrap_or(default)))
    }

    /// Returns a task that succeeds with the success value, or with the value
    /// returned by `f` if it was `None`.
    #[track_caller]
    pub fn unwrap_ok_or_else<F>(self, f: F) -> Task<Result<T, E>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.map(move |result| result.map(|value| value.unwrap_or_else(f)))
    }

    /// Returns a task that succeeds with the success value, or fails with
    /// `error` if it was `None`.
    #[track_caller]
    pub fn unwrap_or_err(self, error: E) -> Task<Result<T, E>> {
        self.map(move |result| result.and_then(|value| value.ok_or(error)))
    }
}
