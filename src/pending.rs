//! Coalescing of concurrent requests onto one in-flight execution.
use crate::task::{Completion, Ownership, Task};
use deferred_util::sync::Mutex;
use std::{
    fmt, mem,
    sync::{Arc, Weak},
};


/// Deduplicates concurrent requests for the same work.
///
/// [`current`](Self::current) returns a task that, when subscribed, joins
/// the execution that is currently in flight, or starts a new one if there is
/// none. Every task joined to an execution completes with the one result it
/// produced. As soon as an execution completes, it is forgotten: the next
/// request starts fresh work rather than returning a stale result.
///
/// Results are handed to each joiner separately, so `T` must be [`Clone`].
pub struct PendingTask<T> {
    shared: Arc<Shared<T>>,
}

type Hook<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    slot: Mutex<Option<Arc<Flight<T>>>>,
    hooks: Mutex<Hooks<T>>,
}

struct Hooks<T> {
    before: Vec<Hook<T>>,
    after: Vec<Hook<T>>,
}

/// One execution, and everyone waiting for it.
struct Flight<T> {
    state: Mutex<FlightState<T>>,
}

struct FlightState<T> {
    /// The underlying task, owned by the flight until it completes.
    task: Option<Task<T>>,
    joiners: Vec<Completion<T>>,
    result: Option<Arc<T>>,
}

// === impl PendingTask ===

impl<T: Clone + Send + Sync + 'static> PendingTask<T> {
    /// Returns a new `PendingTask` with nothing in flight.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(None),
                hooks: Mutex::new(Hooks {
                    before: Vec::new(),
                    after: Vec::new(),
                }),
            }),
        }
    }

    /// Returns a task that joins the execution in flight when it is
    /// subscribed, or starts one by running the task returned by
    /// `generator`.
    ///
    /// `generator` is only called if nothing is in flight at that point.
    pub fn current<G>(&self, generator: G) -> Task<T>
    where
        G: FnOnce() -> Task<T> + Send + 'static,
    {
        self.joiner(generator, false)
    }

    /// Returns a task that, when subscribed, forgets whatever is in flight
    /// and starts a new execution by running the task returned by
    /// `generator`.
    ///
    /// Tasks already joined to the forgotten execution still receive its
    /// result.
    pub fn restart<G>(&self, generator: G) -> Task<T>
    where
        G: FnOnce() -> Task<T> + Send + 'static,
    {
        self.joiner(generator, true)
    }

    /// Returns `true` if an execution is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.shared.slot.with_lock(|slot| slot.is_some())
    }

    /// Adds a hook that observes every execution's result before any of its
    /// joiners is notified.
    pub fn before_complete(&self, hook: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        let hook: Hook<T> = Arc::new(hook);
        self.shared.hooks.with_lock(|hooks| hooks.before.push(hook));
        self
    }

    /// Adds a hook that observes every execution's result after all of its
    /// joiners were notified.
    pub fn after_complete(&self, hook: impl Fn(&T) + Send + Sync + 'static) -> &Self {
        let hook: Hook<T> = Arc::new(hook);
        self.shared.hooks.with_lock(|hooks| hooks.after.push(hook));
        self
    }

    fn joiner<G>(&self, generator: G, restart: bool) -> Task<T>
    where
        G: FnOnce() -> Task<T> + Send + 'static,
    {
        let shared = self.shared.clone();
        let generator = Mutex::new(Some(generator));
        // Keeps the joined execution alive for as long as the joiner is.
        let membership = Mutex::new(None);
        Task::new(move |done| {
            let Some(generator) = generator.with_lock(Option::take) else {
                return;
            };
            let flight = shared.attach(done, generator, restart);
            membership.with_lock(|membership| *membership = Some(flight));
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PendingTask<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for PendingTask<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for PendingTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field(
                "pending",
                &self.shared.slot.with_lock(|slot| slot.is_some()),
            )
            .field("output", &std::any::type_name::<T>())
            .finish()
    }
}

// === impl Shared ===

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn attach<G>(
        self: &Arc<Self>,
        done: Completion<T>,
        generator: G,
        restart: bool,
    ) -> Arc<Flight<T>>
    where
        G: FnOnce() -> Task<T>,
    {
        let (flight, replaced) = self.slot.with_lock(|slot| {
            if let (false, Some(flight)) = (restart, slot.as_ref()) {
                return (Ok(flight.clone()), None);
            }
            let flight = Arc::new(Flight::new());
            let replaced = slot.replace(flight.clone());
            (Err(flight), replaced)
        });
        if replaced.is_some() {
            tracing::debug!(
                task.id = %done.task_id(),
                "restarting; forgetting the execution in flight"
            );
        }
        drop(replaced);

        let flight = match flight {
            Ok(flight) => {
                tracing::debug!(task.id = %done.task_id(), "joining the execution in flight");
                flight.join(done);
                return flight;
            }
            Err(flight) => flight,
        };

        tracing::debug!(task.id = %done.task_id(), "starting a new execution");
        flight.join(done);
        let task = generator().claim(Ownership::Weak);
        flight
            .state
            .with_lock(|state| state.task = Some(task.clone()));

        let shared = Arc::downgrade(self);
        let weak_flight = Arc::downgrade(&flight);
        task.subscribe_claimed(move |value| Self::finish(&shared, &weak_flight, value));
        flight
    }

    fn finish(shared: &Weak<Self>, flight: &Weak<Flight<T>>, value: T) {
        let Some(flight) = flight.upgrade() else {
            tracing::debug!("every joiner was dropped; discarding the result");
            return;
        };

        let (before, after) = match shared.upgrade() {
            Some(shared) => {
                drop(shared.slot.with_lock(|slot| {
                    let current = slot.as_ref().is_some_and(|slot| Arc::ptr_eq(slot, &flight));
                    if current {
                        slot.take()
                    } else {
                        None
                    }
                }));
                shared
                    .hooks
                    .with_lock(|hooks| (hooks.before.clone(), hooks.after.clone()))
            }
            None => (Vec::new(), Vec::new()),
        };

        for hook in &before {
            hook(&value);
        }

        let value = Arc::new(value);
        let (joiners, task) = flight.state.with_lock(|state| {
            state.result = Some(value.clone());
            (mem::take(&mut state.joiners), state.task.take())
        });
        for joiner in joiners {
            joiner.complete(T::clone(&value));
        }

        for hook in &after {
            hook(&value);
        }
        drop(task);
    }
}

// === impl Flight ===

impl<T: Clone + Send + Sync + 'static> Flight<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState {
                task: None,
                joiners: Vec::new(),
                result: None,
            }),
        }
    }

    /// Adds `done` to the joiners, or completes it right away if the result
    /// is already known.
    fn join(&self, done: Completion<T>) {
        let ready = self.state.with_lock(|state| match state.result {
            Some(ref result) => Some((done, result.clone())),
            None => {
                state.joiners.push(done);
                None
            }
        });
        if let Some((done, result)) = ready {
            done.complete(T::clone(&result));
        }
    }
}
