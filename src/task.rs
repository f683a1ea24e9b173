//! The [`Task`] primitive: a lazy, single-subscriber unit of deferred work.
//!
//! A [`Task`] wraps a closure (its *work*) which, given a [`Completion`] sink,
//! eventually produces exactly one value. Nothing happens until the task is
//! [subscribed]: subscribing registers the one and only completion callback
//! and dispatches the work onto the task's work [`Queue`]. When the work
//! hands its value to the sink, the task's *before* hooks, the completion
//! callback, and its *after* hooks run, in that order, on the task's
//! completion [`Queue`].
//!
//! # Ownership
//!
//! There is no cancellation token. Whether a task keeps running is decided
//! entirely by who holds a reference to it:
//!
//! - A [`SelfRetained`] task (the default) keeps itself alive from the moment
//!   it is subscribed until it completes, so the caller may drop its handle
//!   right after subscribing.
//! - A [`Weak`] task is only alive as long as some [`Task`] handle to it is.
//!   If the last handle is dropped before the work completes, the result is
//!   discarded.
//!
//! Whenever the last reference to a task goes away, its cancellation closure
//! (see [`Task::with_cancel`]) runs, exactly once, whether or not the work
//! ever ran. Timers, subscriptions and other external resources held on
//! behalf of the work should be released there.
//!
//! Composing tasks (with [`map`], [`flat_map`], [`and_then`], or
//! [`combine`]) *claims* the composed tasks: they are demoted to [`Weak`],
//! and the composite becomes the only thing that keeps them alive. Dropping a
//! composite therefore cancels everything it was built from, rather than
//! leaving the original work running with nobody left to observe it.
//!
//! # Contract violations
//!
//! Subscribing a task twice, subscribing a task that was claimed by a
//! composite, or changing a task's configuration after it was subscribed are
//! programmer errors, and panic.
//!
//! [subscribed]: Task::subscribe
//! [`SelfRetained`]: Ownership::SelfRetained
//! [`Weak`]: Ownership::Weak
//! [`map`]: Task::map
//! [`flat_map`]: Task::flat_map
//! [`and_then`]: Task::and_then
//! [`combine`]: crate::combine()
use deferred_util::{guard::DropGuard, queue::Queue, sync::Mutex};
use std::{
    any::Any,
    fmt, mem,
    sync::{Arc, Weak},
};

mod id;
mod map;
pub use self::id::TaskId;


/// A lazy, single-subscriber unit of deferred work producing one `T`.
///
/// `Task` is a cheaply clonable handle: clones refer to the same task. See the
/// [module-level documentation](self) for an overview of the task lifecycle.
pub struct Task<T> {
    inner: Arc<Inner<T>>,
}

/// The sink a task's work hands its result to.
///
/// A `Completion` is consumed by [`complete`](Completion::complete), so the
/// work can produce at most one value. It only holds a weak reference to the
/// task: if the task was dropped in the meantime, the value is discarded.
pub struct Completion<T> {
    task: Weak<Inner<T>>,
    id: TaskId,
}

/// Whether a subscribed task keeps itself alive until it completes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Ownership {
    /// The task holds a reference to itself between subscription and
    /// completion.
    #[default]
    SelfRetained,
    /// The task relies entirely on external owners to stay alive.
    Weak,
}

/// An opaque value attached to a task with [`Task::with_user_info`].
pub type UserInfo = Arc<dyn Any + Send + Sync>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Unsubscribed,
    /// Reserved by a composite; only the composite may subscribe.
    Claimed,
    Subscribed,
    Completed,
}

type Work<T> = Box<dyn Fn(Completion<T>) + Send + Sync>;
type Callback<T> = Box<dyn FnOnce(T) + Send>;
type Hook<T> = Box<dyn FnOnce(&T) + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;

struct Inner<T> {
    id: TaskId,
    // Only ever run by its `Drop`. Declared before `work` so that it runs
    // before anything the work captured is released.
    _on_cancel: Mutex<DropGuard<CancelFn>>,
    work: Work<T>,
    state: Mutex<State<T>>,
}

struct State<T> {
    phase: Phase,
    ownership: Ownership,
    /// The self-reference of a subscribed `SelfRetained` task.
    retained: Option<Arc<Inner<T>>>,
    work_queue: Queue,
    completion_queue: Queue,
    user_info: Option<UserInfo>,
    callbacks: Callbacks<T>,
}

struct Callbacks<T> {
    before: Vec<Hook<T>>,
    complete: Option<Callback<T>>,
    after: Vec<Hook<T>>,
    /// Clones the result for the after-hooks, since the completion callback
    /// consumes it. Only set once an after-hook was added.
    snapshot: Option<fn(&T) -> T>,
}

// === impl Task ===

impl<T: Send + 'static> Task<T> {
    /// Returns a new task that runs `work` when it is subscribed.
    ///
    /// `work` is called at most once, with the [`Completion`] it must hand its
    /// result to. The closure itself (and everything it captured) lives as
    /// long as the task does.
    pub fn new<W>(work: W) -> Self
    where
        W: Fn(Completion<T>) + Send + Sync + 'static,
    {
        Self::with_cancel(work, || {})
    }

    /// Returns a new task that runs `work` when it is subscribed, and
    /// `on_cancel` when the task is dropped.
    ///
    /// `on_cancel` runs exactly once, when the last reference to the task
    /// goes away, regardless of whether `work` ever ran or completed.
    pub fn with_cancel<W, C>(work: W, on_cancel: C) -> Self
    where
        W: Fn(Completion<T>) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let id = TaskId::next();
        tracing::trace!(task.id = %id, task.output = %std::any::type_name::<T>(), "task created");
        Self {
            inner: Arc::new(Inner {
                id,
                _on_cancel: Mutex::new(DropGuard::new(Box::new(on_cancel))),
                work: Box::new(work),
                state: Mutex::new(State::new()),
            }),
        }
    }

    /// Returns a task which completes with `value` as soon as it is
    /// subscribed.
    pub fn ready(value: T) -> Self {
        let value = Mutex::new(Some(value));
        Self::new(move |done| {
            if let Some(value) = value.with_lock(Option::take) {
                done.complete(value)
            }
        })
    }

    /// Returns a task which completes with the value returned by `f`, calling
    /// `f` when the task is subscribed.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let f = Mutex::new(Some(f));
        Self::new(move |done| {
            if let Some(f) = f.with_lock(Option::take) {
                done.complete(f())
            }
        })
    }

    /// Returns this task's unique id.
    #[must_use]
    #[inline]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Returns this task's current [`Ownership`] policy.
    #[must_use]
    pub fn ownership(&self) -> Ownership {
        self.inner.state.with_lock(|state| state.ownership)
    }

    /// Returns `true` if this task has been subscribed (or claimed by a
    /// composite).
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .state
            .with_lock(|state| state.phase != Phase::Unsubscribed)
    }

    /// Returns `true` once this task's work has produced its result.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.inner
            .state
            .with_lock(|state| state.phase == Phase::Completed)
    }

    /// Returns the value attached with [`with_user_info`](Self::with_user_info),
    /// if any.
    #[must_use]
    pub fn user_info(&self) -> Option<UserInfo> {
        self.inner.state.with_lock(|state| state.user_info.clone())
    }

    /// Returns `true` if `self` and `other` are handles to the same task.
    #[must_use]
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // === configuration ===

    /// Makes this task [`Weak`](Ownership::Weak): once subscribed, it only
    /// stays alive as long as something else holds it.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn weakify(self) -> Self {
        self.with_ownership(Ownership::Weak)
    }

    /// Makes this task [`SelfRetained`](Ownership::SelfRetained): once
    /// subscribed, it keeps itself alive until it completes.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn strongify(self) -> Self {
        self.with_ownership(Ownership::SelfRetained)
    }

    /// Sets this task's [`Ownership`] policy.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn with_ownership(self, ownership: Ownership) -> Self {
        self.configure("change the ownership of", |state| {
            state.ownership = ownership
        })
    }

    /// Sets the queue this task's work is dispatched to when it is
    /// subscribed. Defaults to [`Queue::Inline`].
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn with_work_queue(self, queue: impl Into<Queue>) -> Self {
        let queue = queue.into();
        self.configure("set the work queue of", |state| state.work_queue = queue)
    }

    /// Sets the queue this task's hooks and completion callback run on.
    /// Defaults to [`Queue::Inline`], i.e. whichever thread completed the
    /// work.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn with_completion_queue(self, queue: impl Into<Queue>) -> Self {
        let queue = queue.into();
        self.configure("set the completion queue of", |state| {
            state.completion_queue = queue
        })
    }

    /// Attaches an opaque value to this task, retrievable with
    /// [`user_info`](Self::user_info).
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn with_user_info(self, info: impl Any + Send + Sync) -> Self {
        let info: UserInfo = Arc::new(info);
        self.configure("attach user info to", |state| state.user_info = Some(info))
    }

    /// Adds a hook that observes the result right before the completion
    /// callback runs.
    ///
    /// Hooks run in the order they were added, on the completion queue.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn before_complete(self, hook: impl FnOnce(&T) + Send + 'static) -> Self {
        self.configure("add a hook to", |state| {
            state.callbacks.before.push(Box::new(hook))
        })
    }

    /// Adds a hook that observes the result right after the completion
    /// callback ran.
    ///
    /// Hooks run in the order they were added, on the completion queue.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed.
    #[must_use]
    #[track_caller]
    pub fn after_complete(self, hook: impl FnOnce(&T) + Send + 'static) -> Self
    where
        T: Clone,
    {
        self.configure("add a hook to", |state| {
            state.callbacks.after.push(Box::new(hook));
            state.callbacks.snapshot = Some(<T as Clone>::clone);
        })
    }

    #[track_caller]
    fn configure(self, what: &'static str, f: impl FnOnce(&mut State<T>)) -> Self {
        let rejected = self.inner.state.with_lock(|state| {
            if state.phase == Phase::Unsubscribed {
                f(state);
                None
            } else {
                Some((state.phase, f))
            }
        });
        if let Some((phase, f)) = rejected {
            drop(f);
            panic!(
                "cannot {what} task {} after it was subscribed (task is {phase:?})",
                self.inner.id,
            );
        }
        self
    }

    // === subscription ===

    /// Subscribes `completion` to this task's result, starting its work.
    ///
    /// If both queues are [inline](Queue::Inline) and the work completes
    /// synchronously, `completion` has run by the time this returns.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed, or was claimed by a composite.
    #[track_caller]
    pub fn subscribe(&self, completion: impl FnOnce(T) + Send + 'static) {
        self.start(Box::new(completion), Phase::Unsubscribed)
    }

    /// Subscribes to this task and ignores its result.
    ///
    /// The work still runs under the task's current ownership policy: a
    /// [`Weak`](Ownership::Weak) task stops mattering as soon as its last
    /// handle is dropped.
    ///
    /// # Panics
    ///
    /// If the task was already subscribed, or was claimed by a composite.
    #[track_caller]
    pub fn one_way(&self) {
        self.subscribe(|_| {})
    }

    /// Reserves this task for a composite, setting its ownership policy.
    ///
    /// Afterwards, only [`subscribe_claimed`](Self::subscribe_claimed) may
    /// start the task.
    #[track_caller]
    pub(crate) fn claim(self, ownership: Ownership) -> Self {
        let phase = self.inner.state.with_lock(|state| {
            let phase = state.phase;
            if phase == Phase::Unsubscribed {
                state.phase = Phase::Claimed;
                state.ownership = ownership;
            }
            phase
        });
        assert!(
            phase == Phase::Unsubscribed,
            "cannot compose task {} after it was subscribed (task is {phase:?})",
            self.inner.id,
        );
        self
    }

    /// Subscribes to a task previously [claimed](Self::claim).
    #[track_caller]
    pub(crate) fn subscribe_claimed(&self, completion: impl FnOnce(T) + Send + 'static) {
        self.start(Box::new(completion), Phase::Claimed)
    }

    #[track_caller]
    fn start(&self, complete: Callback<T>, expected: Phase) {
        let started = self.inner.state.with_lock(|state| {
            if state.phase != expected {
                return Err((state.phase, complete));
            }
            state.phase = Phase::Subscribed;
            state.callbacks.complete = Some(complete);
            if state.ownership == Ownership::SelfRetained {
                state.retained = Some(self.inner.clone());
            }
            Ok((state.ownership, state.work_queue.clone()))
        });

        let (ownership, queue) = match started {
            Ok(started) => started,
            Err((phase, complete)) => {
                drop(complete);
                match phase {
                    Phase::Claimed => panic!(
                        "task {} was claimed by a composite and cannot be subscribed directly",
                        self.inner.id
                    ),
                    _ => panic!(
                        "task {} was subscribed twice (task is {phase:?})",
                        self.inner.id
                    ),
                }
            }
        };

        tracing::trace!(
            task.id = %self.inner.id,
            ?ownership,
            work_queue = ?queue,
            "task subscribed"
        );

        if queue.is_inline() {
            self.inner.run_work();
            return;
        }

        // A self-retained task is kept alive by its self-reference. A weak
        // task that is dropped before the job runs never runs its work.
        let task = Arc::downgrade(&self.inner);
        let id = self.inner.id;
        queue.run(move || match task.upgrade() {
            Some(inner) => inner.run_work(),
            None => tracing::debug!(task.id = %id, "task dropped before its work started"),
        });
    }
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (phase, ownership) = self
            .inner
            .state
            .with_lock(|state| (state.phase, state.ownership));
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("phase", &phase)
            .field("ownership", &ownership)
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

// === impl Completion ===

impl<T: Send + 'static> Completion<T> {
    /// Completes the task with `value`.
    ///
    /// If the task has already been dropped, `value` is discarded.
    pub fn complete(self, value: T) {
        let Some(inner) = self.task.upgrade() else {
            tracing::debug!(
                task.id = %self.id,
                "task dropped before completing; discarding result"
            );
            return;
        };
        inner.complete(value);
    }

    /// Returns the id of the task this sink completes.
    #[must_use]
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("task", &self.id)
            .field("alive", &(self.task.strong_count() > 0))
            .finish()
    }
}

// === impl Inner ===

impl<T: Send + 'static> Inner<T> {
    fn run_work(self: &Arc<Self>) {
        (self.work)(Completion {
            task: Arc::downgrade(self),
            id: self.id,
        })
    }

    fn complete(&self, value: T) {
        let (callbacks, queue, retained) = self.state.with_lock(|state| {
            state.phase = Phase::Completed;
            (
                mem::take(&mut state.callbacks),
                state.completion_queue.clone(),
                state.retained.take(),
            )
        });

        tracing::trace!(
            task.id = %self.id,
            self_retained = retained.is_some(),
            completion_queue = ?queue,
            "task completed"
        );

        queue.run(move || callbacks.fire(value));
        drop(retained);
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        tracing::trace!(task.id = %self.id, "task dropped");
    }
}

// === impl State ===

impl<T> State<T> {
    fn new() -> Self {
        Self {
            phase: Phase::Unsubscribed,
            ownership: Ownership::SelfRetained,
            retained: None,
            work_queue: Queue::Inline,
            completion_queue: Queue::Inline,
            user_info: None,
            callbacks: Callbacks::default(),
        }
    }
}

// === impl Callbacks ===

impl<T> Callbacks<T> {
    fn fire(self, value: T) {
        let Self {
            before,
            complete,
            after,
            snapshot,
        } = self;

        for hook in before {
            hook(&value);
        }

        let after_value = match (after.is_empty(), snapshot) {
            (true, _) => None,
            (false, Some(snapshot)) => Some(snapshot(&value)),
            (false, None) => unreachable!("after-hooks are always added with a snapshot function"),
        };

        if let Some(complete) = complete {
            complete(value);
        }

        if let Some(value) = after_value {
            for hook in after {
                hook(&value);
            }
        }
    }
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            before: Vec::new(),
            complete: None,
            after: Vec::new(),
            snapshot: None,
        }
    }
}
