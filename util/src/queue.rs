//! Where closures run.
//!
//! A [`Queue`] either runs a closure [inline], on the caller's own stack,
//! or hands it to an [`Executor`], which runs it asynchronously. An executor
//! is anything that can run a boxed closure "later", and "later, after a
//! delay".
//!
//! [inline]: Queue::Inline
use crate::sync::blocking::Mutex;
use std::{fmt, io, sync::Arc, thread, time::Duration};

/// A unit of work submitted to a [`Queue`] or an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs [`Job`]s asynchronously.
pub trait Executor: Send + Sync {
    /// Runs `job` asynchronously, as soon as possible.
    fn execute(&self, job: Job);

    /// Runs `job` asynchronously, no sooner than `delay` from now.
    fn execute_after(&self, delay: Duration, job: Job);

    /// A human-readable name for this executor, used in diagnostics.
    fn name(&self) -> &str {
        "executor"
    }
}

/// Where a closure is run.
#[derive(Clone, Default)]
pub enum Queue {
    /// Run the closure immediately, on the calling thread.
    #[default]
    Inline,
    /// Dispatch the closure to an [`Executor`].
    Async(Arc<dyn Executor>),
}

/// An [`Executor`] which runs every job on a freshly spawned OS thread.
///
/// All threads spawned by a `ThreadExecutor` carry its name, which makes
/// them easy to pick out in logs (with `with_thread_names`) and debuggers.
/// If a thread cannot be spawned, the error is logged and the job runs on
/// the calling thread instead, so that a submitted job is never lost.
#[derive(Clone)]
pub struct ThreadExecutor {
    name: Arc<str>,
}

/// An error returned by [`ThreadExecutor::try_execute`] when the operating
/// system refuses to spawn a thread.
#[derive(Debug, thiserror::Error)]
#[error("executor `{name}` could not spawn a thread")]
pub struct SpawnError {
    name: Arc<str>,
    #[source]
    source: io::Error,
}

// === impl Queue ===

impl Queue {
    /// Returns a queue that dispatches to `executor`.
    #[must_use]
    pub fn on(executor: impl Executor + 'static) -> Self {
        Self::Async(Arc::new(executor))
    }

    /// Returns `true` if this queue runs closures on the calling thread.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        matches!(self, Self::Inline)
    }

    /// Runs `f` on this queue.
    pub fn run(&self, f: impl FnOnce() + Send + 'static) {
        match self {
            Self::Inline => f(),
            Self::Async(executor) => executor.execute(Box::new(f)),
        }
    }

    /// Runs `f` on this queue, no sooner than `delay` from now.
    ///
    /// An [`Inline`](Self::Inline) queue blocks the calling thread for
    /// `delay` before running `f`.
    pub fn run_after(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        match self {
            Self::Inline => {
                thread::sleep(delay);
                f()
            }
            Self::Async(executor) => executor.execute_after(delay, Box::new(f)),
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline => f.write_str("Inline"),
            Self::Async(executor) => f.debug_tuple("Async").field(&executor.name()).finish(),
        }
    }
}

impl<E: Executor + 'static> From<Arc<E>> for Queue {
    fn from(executor: Arc<E>) -> Self {
        Self::Async(executor)
    }
}

impl From<Arc<dyn Executor>> for Queue {
    fn from(executor: Arc<dyn Executor>) -> Self {
        Self::Async(executor)
    }
}

// === impl ThreadExecutor ===

impl ThreadExecutor {
    /// Returns a new executor whose threads are named `name`.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    /// Runs `job` on a new thread, returning an error if the thread could
    /// not be spawned.
    ///
    /// Unlike [`Executor::execute`], a job that could not be spawned is
    /// dropped without running.
    pub fn try_execute(&self, job: Job) -> Result<(), SpawnError> {
        self.spawn(None, job).map_err(|(error, _)| error)
    }

    fn spawn(&self, delay: Option<Duration>, job: Job) -> Result<(), (SpawnError, Job)> {
        // The spawned closure is dropped if spawning fails; keep a way to
        // get the job back out so the caller can still run it.
        let slot = Arc::new(Mutex::new(Some(job)));
        let thread_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name(self.name.to_string())
            .spawn(move || {
                if let Some(delay) = delay {
                    thread::sleep(delay);
                }
                if let Some(job) = thread_slot.with_lock(Option::take) {
                    job()
                }
            });

        match spawned {
            Ok(_) => Ok(()),
            Err(source) => {
                let error = SpawnError {
                    name: self.name.clone(),
                    source,
                };
                match slot.with_lock(Option::take) {
                    Some(job) => Err((error, job)),
                    // The job cannot have run if the thread never started.
                    None => unreachable!("job taken by a thread that failed to spawn"),
                }
            }
        }
    }

    fn spawn_or_run_inline(&self, delay: Option<Duration>, job: Job) {
        if let Err((error, job)) = self.spawn(delay, job) {
            tracing::error!(%error, executor = %self.name, "running job on the calling thread");
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            job()
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, job: Job) {
        self.spawn_or_run_inline(None, job)
    }

    fn execute_after(&self, delay: Duration, job: Job) {
        self.spawn_or_run_inline(Some(delay), job)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    #[test]
    fn inline_runs_on_the_calling_thread() {
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        Queue::Inline.run(move || tx.send(thread::current().id()).unwrap());
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn thread_executor_runs_on_a_named_thread() {
        let _trace = crate::test_util::trace_init();
        let queue = Queue::on(ThreadExecutor::new("queue-test"));
        assert!(!queue.is_inline());

        let (tx, rx) = mpsc::channel();
        queue.run(move || {
            tx.send(thread::current().name().map(String::from)).unwrap();
        });
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("queue-test"));
    }

    #[test]
    fn try_execute_runs_the_job_on_a_named_thread() {
        let _trace = crate::test_util::trace_init();
        let executor = ThreadExecutor::new("try-execute");
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            tx.send(thread::current().name().map(String::from)).unwrap();
        });
        executor.try_execute(job).unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("try-execute"));
    }

    #[test]
    fn spawn_error_names_the_executor() {
        let error = SpawnError {
            name: "busy".into(),
            source: io::Error::new(io::ErrorKind::WouldBlock, "no threads left"),
        };
        assert_eq!(
            error.to_string(),
            "executor `busy` could not spawn a thread"
        );
        let source = std::error::Error::source(&error).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("no threads left"));
    }

    #[test]
    fn run_after_waits_for_the_delay() {
        let queue = Queue::on(ThreadExecutor::new("queue-delay"));
        let (tx, rx) = mpsc::channel();
        let started = Instant::now();
        queue.run_after(Duration::from_millis(30), move || {
            tx.send(Instant::now()).unwrap();
        });
        let ran_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ran_at.duration_since(started) >= Duration::from_millis(30));
    }

    #[test]
    fn debug_names_the_executor() {
        let queue = Queue::on(ThreadExecutor::new("named"));
        assert_eq!(format!("{queue:?}"), "Async(\"named\")");
        assert_eq!(format!("{:?}", Queue::Inline), "Inline");
    }
}
