//! Bounded re-running of a task until its result is satisfactory.
use crate::task::{Completion, Ownership, Task};
use deferred_util::{
    queue::{Executor, Queue},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

#[cfg(test)]
mod tests;

/// Repeatedly generates and runs a task, until its result no longer asks to
/// be repeated or the retry budget is exhausted.
///
/// A `PollingTask` is a reusable description of a polling loop; every call to
/// [`start`](Self::start) returns a new task running an independent loop.
/// Each attempt runs the task returned by the generator. When it completes,
/// the `on_response` hook observes the result, and the loop schedules
/// another attempt on its executor, after the idle interval, if
///
/// - there are retries left, *or* the minimum waiting time has not elapsed
///   since the first attempt started, and
/// - `should_repeat` returns `true` for the result.
///
/// Otherwise, the started task completes with that result.
///
/// Dropping the started task cancels the loop: no further attempt is
/// started, and the attempt in flight (if any) is released.
///
/// # Examples
///
/// ```
/// use deferred_task::{PollingTask, Task, ThreadExecutor};
/// use std::{sync::Arc, time::Duration};
///
/// let polling = PollingTask::builder(Arc::new(ThreadExecutor::new("poll")), || Task::ready(1))
///     .idle_interval(Duration::from_millis(10))
///     .retry_count(3)
///     .should_repeat(|value| *value < 1)
///     .build();
///
/// let result = deferred_task::sync(polling.start(), None, || 0);
/// assert_eq!(result, 1);
/// ```
pub struct PollingTask<T> {
    config: Arc<Config<T>>,
}

/// Configures a [`PollingTask`].
///
/// Returned by [`PollingTask::builder`].
#[must_use = "a `Builder` does nothing unless `build` is called"]
pub struct Builder<T> {
    config: Config<T>,
}

struct Config<T> {
    generator: Box<dyn Fn() -> Task<T> + Send + Sync>,
    should_repeat: Box<dyn Fn(&T) -> bool + Send + Sync>,
    on_response: Box<dyn Fn(&T) + Send + Sync>,
    /// Where attempts after the first are scheduled.
    queue: Queue,
    idle_interval: Duration,
    retry_count: usize,
    minimum_waiting_time: Option<Duration>,
}

/// One running polling loop.
struct Poll<T> {
    config: Arc<Config<T>>,
    cancelled: AtomicBool,
    /// The attempt in flight.
    cached: Mutex<Option<Task<T>>>,
}

impl<T: Send + 'static> PollingTask<T> {
    /// The shortest delay between two attempts.
    pub const MIN_IDLE_INTERVAL: Duration = Duration::from_millis(1);

    /// The idle interval used unless [`Builder::idle_interval`] is called.
    pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

    /// The retry count used unless [`Builder::retry_count`] is called.
    pub const DEFAULT_RETRY_COUNT: usize = 3;

    /// Returns a [`Builder`] for a polling loop that runs the tasks returned
    /// by `generator`, scheduling attempts on `executor`.
    pub fn builder<G>(executor: Arc<dyn Executor>, generator: G) -> Builder<T>
    where
        G: Fn() -> Task<T> + Send + Sync + 'static,
    {
        Builder {
            config: Config {
                generator: Box::new(generator),
                should_repeat: Box::new(|_: &T| false),
                on_response: Box::new(|_: &T| {}),
                queue: Queue::Async(executor),
                idle_interval: Self::DEFAULT_IDLE_INTERVAL,
                retry_count: Self::DEFAULT_RETRY_COUNT,
                minimum_waiting_time: None,
            },
        }
    }

    /// Returns a task that runs a new polling loop when it is subscribed.
    pub fn start(&self) -> Task<T> {
        let poll = Arc::new(Poll {
            config: self.config.clone(),
            cancelled: AtomicBool::new(false),
            cached: Mutex::new(None),
        });
        let on_cancel = poll.clone();
        Task::with_cancel(
            move |done| {
                let remaining = poll.config.retry_count.saturating_sub(1);
                poll.attempt(done, remaining, Instant::now())
            },
            move || on_cancel.cancel(),
        )
    }
}

impl<T> fmt::Debug for PollingTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.config, f)
    }
}

// === impl Builder ===

impl<T: Send + 'static> Builder<T> {
    /// Sets how long to wait between the end of one attempt and the start of
    /// the next.
    ///
    /// Intervals shorter than [`PollingTask::MIN_IDLE_INTERVAL`] are raised
    /// to it.
    pub fn idle_interval(self, idle_interval: Duration) -> Self {
        Self {
            config: Config {
                idle_interval,
                ..self.config
            },
        }
    }

    /// Sets the maximum number of attempts.
    ///
    /// Polling only makes sense with at least two attempts; a smaller count
    /// is reported by [`build`](Self::build).
    pub fn retry_count(self, retry_count: usize) -> Self {
        Self {
            config: Config {
                retry_count,
                ..self.config
            },
        }
    }

    /// Keeps attempting, regardless of the retry count, until `time` has
    /// elapsed since the first attempt started.
    ///
    /// `should_repeat` still has to ask for every repetition.
    pub fn minimum_waiting_time(self, time: Duration) -> Self {
        Self {
            config: Config {
                minimum_waiting_time: Some(time),
                ..self.config
            },
        }
    }

    /// Sets the predicate deciding whether a result asks for another
    /// attempt. By default, no result does.
    pub fn should_repeat<F>(self, should_repeat: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            config: Config {
                should_repeat: Box::new(should_repeat),
                ..self.config
            },
        }
    }

    /// Sets a hook observing the result of every attempt.
    pub fn on_response<F>(self, on_response: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            config: Config {
                on_response: Box::new(on_response),
                ..self.config
            },
        }
    }

    /// Returns the configured [`PollingTask`].
    ///
    /// # Panics
    ///
    /// In debug builds, if the retry count is less than two. In release
    /// builds, such a loop makes a single attempt.
    #[track_caller]
    pub fn build(self) -> PollingTask<T> {
        let retry_count = self.config.retry_count;
        if retry_count <= 1 {
            tracing::warn!(
                retry_count,
                "a polling loop with a retry count of at most one never repeats"
            );
        }
        debug_assert!(
            retry_count > 1,
            "polling with a retry count of {retry_count} makes a single attempt",
        );
        PollingTask {
            config: Arc::new(self.config),
        }
    }
}

impl<T> fmt::Debug for Builder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .finish()
    }
}

// === impl Config ===

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTask")
            .field("queue", &self.queue)
            .field("idle_interval", &self.idle_interval)
            .field("retry_count", &self.retry_count)
            .field("minimum_waiting_time", &self.minimum_waiting_time)
            .field("output", &std::any::type_name::<T>())
            .finish_non_exhaustive()
    }
}

// === impl Poll ===

impl<T: Send + 'static> Poll<T> {
    fn attempt(self: &Arc<Self>, done: Completion<T>, remaining: usize, started: Instant) {
        if self.cancelled.load(Ordering::Acquire) {
            tracing::debug!(
                task.id = %done.task_id(),
                "polling cancelled before an attempt"
            );
            return;
        }

        let task = (self.config.generator)().claim(Ownership::Weak);
        tracing::debug!(
            task.id = %done.task_id(),
            attempt.id = %task.id(),
            remaining,
            "starting polling attempt"
        );
        drop(self.cached.with_lock(|cached| cached.replace(task.clone())));

        let poll = self.clone();
        task.subscribe_claimed(move |value| poll.respond(done, remaining, started, value));
    }

    fn respond(
        self: &Arc<Self>,
        done: Completion<T>,
        remaining: usize,
        started: Instant,
        value: T,
    ) {
        if self.cancelled.load(Ordering::Acquire) {
            tracing::debug!(
                task.id = %done.task_id(),
                "polling cancelled during an attempt"
            );
            return;
        }

        let config = &self.config;
        (config.on_response)(&value);

        if self.can_repeat(remaining, started) && (config.should_repeat)(&value) {
            let delay = config
                .idle_interval
                .max(PollingTask::<T>::MIN_IDLE_INTERVAL);
            tracing::debug!(
                task.id = %done.task_id(),
                ?delay,
                remaining,
                "rescheduling polling attempt"
            );
            let poll = self.clone();
            config.queue.run_after(delay, move || {
                poll.attempt(done, remaining.saturating_sub(1), started)
            });
            return;
        }

        tracing::debug!(task.id = %done.task_id(), "polling finished");
        done.complete(value);
        drop(self.cached.with_lock(Option::take));
    }

    fn can_repeat(&self, remaining: usize, started: Instant) -> bool {
        remaining > 0
            || self
                .config
                .minimum_waiting_time
                .is_some_and(|minimum| started.elapsed() < minimum)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let cached = self.cached.with_lock(Option::take);
        if let Some(ref attempt) = cached {
            tracing::debug!(
                attempt.id = %attempt.id(),
                "polling dropped; releasing the attempt in flight"
            );
        }
        drop(cached);
    }
}
