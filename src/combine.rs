//! Fan-out / fan-in of independent tasks.
//!
//! Combining tasks claims every one of them as [`Weak`](Ownership::Weak):
//! the combined task is their only owner. Children are subscribed together
//! when the combined task is subscribed, may complete in any order, and the
//! combined result is handed over exactly once, in input order. Dropping the
//! combined task before that releases every child it still holds.
use crate::task::{Completion, Ownership, Task};
use deferred_util::sync::Mutex;
use std::{mem, sync::Arc};

#[cfg(test)]
mod tests;

/// Returns a task that runs every task in `tasks` and completes with their
/// results, in the order the tasks were given.
///
/// An empty input completes immediately with an empty `Vec`.
///
/// # Panics
///
/// If any of `tasks` was already subscribed or claimed.
#[track_caller]
pub fn combine<T, I>(tasks: I) -> Task<Vec<T>>
where
    T: Send + 'static,
    I: IntoIterator<Item = Task<T>>,
{
    let slots = tasks
        .into_iter()
        .map(|task| Slot::Pending(task.claim(Ownership::Weak)))
        .collect::<Vec<_>>();
    if slots.is_empty() {
        return Task::ready(Vec::new());
    }

    let group = Arc::new(Group {
        state: Mutex::new(GroupState {
            remaining: slots.len(),
            slots,
            done: None,
        }),
    });
    let on_cancel = group.clone();
    let task = Task::with_cancel(
        move |done| {
            let children = group.state.with_lock(|state| {
                state.done = Some(done);
                state
                    .slots
                    .iter()
                    .enumerate()
                    .filter_map(|(index, slot)| Some((index, slot.pending()?)))
                    .collect::<Vec<_>>()
            });
            for (index, child) in children {
                let group = group.clone();
                child.subscribe_claimed(move |value| group.fill(index, value));
            }
        },
        move || on_cancel.release(),
    );
    tracing::trace!(task.id = %task.id(), "combined task created");
    task
}

impl<T: Send + 'static> Task<T> {
    /// Returns a task that runs every task in `tasks` and completes with their
    /// results, in input order. See [`combine`].
    #[track_caller]
    pub fn combine_all<I>(tasks: I) -> Task<Vec<T>>
    where
        I: IntoIterator<Item = Task<T>>,
    {
        combine(tasks)
    }

    /// Returns a task that runs this task and `other`, completing with both
    /// results once both are available.
    ///
    /// # Panics
    ///
    /// If either task was already subscribed or claimed.
    #[track_caller]
    pub fn combine_with<U>(self, other: Task<U>) -> Task<(T, U)>
    where
        U: Send + 'static,
    {
        Pair::combine(self, other, |left, right| {
            if !(left.is_ready() && right.is_ready()) {
                return None;
            }
            Some((left.take()?, right.take()?))
        })
    }
}

impl<T, E> Task<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Returns a task that runs this task and `other`, succeeding with both
    /// success values, or failing as soon as either fails.
    ///
    /// If both tasks have failed by the time the result is decided, this
    /// task's error wins. Once a failure decided the result, the other task
    /// is released.
    ///
    /// # Panics
    ///
    /// If either task was already subscribed or claimed.
    #[track_caller]
    pub fn combine_success<U>(self, other: Task<Result<U, E>>) -> Task<Result<(T, U), E>>
    where
        U: Send + 'static,
    {
        Pair::combine(self, other, |left, right| {
            if matches!(left, Slot::Ready(Err(_))) {
                return left.take()?.err().map(Err);
            }
            if matches!(right, Slot::Ready(Err(_))) {
                return right.take()?.err().map(Err);
            }
            if !(left.is_ready() && right.is_ready()) {
                return None;
            }
            match (left.take()?, right.take()?) {
                (Ok(left), Ok(right)) => Some(Ok((left, right))),
                _ => unreachable!("failures were handled above"),
            }
        })
    }
}

/// A child of a combined task.
enum Slot<T> {
    /// Still running, and owned by the combined task.
    Pending(Task<T>),
    Ready(T),
    /// Either consumed by the combined result or released.
    Empty,
}

struct Group<T> {
    state: Mutex<GroupState<T>>,
}

struct GroupState<T> {
    slots: Vec<Slot<T>>,
    remaining: usize,
    done: Option<Completion<Vec<T>>>,
}

type Resolve<T, U, O> = fn(&mut Slot<T>, &mut Slot<U>) -> Option<O>;

/// Two children with different output types, and the rule deciding when
/// their combined result is known.
struct Pair<T, U, O> {
    state: Mutex<PairState<T, U, O>>,
    resolve: Resolve<T, U, O>,
}

struct PairState<T, U, O> {
    left: Slot<T>,
    right: Slot<U>,
    done: Option<Completion<O>>,
}

/// What a filled pair hands back so it can be acted upon outside the lock.
struct Settled<T, U, O> {
    done: Option<Completion<O>>,
    output: Option<O>,
    left: Slot<T>,
    right: Slot<U>,
}

// === impl Slot ===

impl<T: Send + 'static> Slot<T> {
    fn pending(&self) -> Option<Task<T>> {
        match self {
            Slot::Pending(task) => Some(task.clone()),
            _ => None,
        }
    }

    fn is_ready(&self) -> bool {
        matches!(self, Slot::Ready(_))
    }

    /// Takes the value out of a ready slot.
    fn take(&mut self) -> Option<T> {
        match mem::replace(self, Slot::Empty) {
            Slot::Ready(value) => Some(value),
            other => {
                *self = other;
                None
            }
        }
    }
}

// === impl Group ===

impl<T: Send + 'static> Group<T> {
    fn fill(&self, index: usize, value: T) {
        let (previous, finished) = self.state.with_lock(|state| {
            if state.done.is_none() {
                return (Slot::Ready(value), None);
            }
            let previous = mem::replace(&mut state.slots[index], Slot::Ready(value));
            if matches!(previous, Slot::Pending(_)) {
                state.remaining -= 1;
            }
            if state.remaining > 0 {
                return (previous, None);
            }
            let values = state
                .slots
                .iter_mut()
                .filter_map(Slot::take)
                .collect::<Vec<_>>();
            (previous, state.done.take().map(|done| (done, values)))
        });
        drop(previous);

        if let Some((done, values)) = finished {
            tracing::trace!(
                task.id = %done.task_id(),
                children = values.len(),
                "all children completed"
            );
            done.complete(values);
        }
    }

    fn release(&self) {
        let (done, slots) = self
            .state
            .with_lock(|state| (state.done.take(), mem::take(&mut state.slots)));
        let pending = slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count();
        if pending > 0 {
            tracing::debug!(pending, "combined task dropped; releasing its children");
        }
        drop((done, slots));
    }
}

// === impl Pair ===

impl<T, U, O> Pair<T, U, O>
where
    T: Send + 'static,
    U: Send + 'static,
    O: Send + 'static,
{
    #[track_caller]
    fn combine(left: Task<T>, right: Task<U>, resolve: Resolve<T, U, O>) -> Task<O> {
        let pair = Arc::new(Self {
            state: Mutex::new(PairState {
                left: Slot::Pending(left.claim(Ownership::Weak)),
                right: Slot::Pending(right.claim(Ownership::Weak)),
                done: None,
            }),
            resolve,
        });
        let on_cancel = pair.clone();
        Task::with_cancel(
            move |done| {
                let (left, right) = pair.state.with_lock(|state| {
                    state.done = Some(done);
                    (state.left.pending(), state.right.pending())
                });
                if let Some(left) = left {
                    let pair = pair.clone();
                    left.subscribe_claimed(move |value| pair.fill_left(value));
                }
                if let Some(right) = right {
                    let pair = pair.clone();
                    right.subscribe_claimed(move |value| pair.fill_right(value));
                }
            },
            move || on_cancel.release(),
        )
    }

    fn fill_left(&self, value: T) {
        let (previous, settled) = self.state.with_lock(|state| {
            if state.done.is_none() {
                return (Slot::Ready(value), None);
            }
            let previous = mem::replace(&mut state.left, Slot::Ready(value));
            (previous, self.settle(state))
        });
        drop(previous);
        if let Some(settled) = settled {
            settled.finish();
        }
    }

    fn fill_right(&self, value: U) {
        let (previous, settled) = self.state.with_lock(|state| {
            if state.done.is_none() {
                return (Slot::Ready(value), None);
            }
            let previous = mem::replace(&mut state.right, Slot::Ready(value));
            (previous, self.settle(state))
        });
        drop(previous);
        if let Some(settled) = settled {
            settled.finish();
        }
    }

    fn settle(&self, state: &mut PairState<T, U, O>) -> Option<Settled<T, U, O>> {
        let output = (self.resolve)(&mut state.left, &mut state.right)?;
        Some(Settled {
            done: state.done.take(),
            output: Some(output),
            left: mem::replace(&mut state.left, Slot::Empty),
            right: mem::replace(&mut state.right, Slot::Empty),
        })
    }

    fn release(&self) {
        let released = self.state.with_lock(|state| Settled {
            done: state.done.take(),
            output: None,
            left: mem::replace(&mut state.left, Slot::Empty),
            right: mem::replace(&mut state.right, Slot::Empty),
        });
        drop(released);
    }
}

// === impl Settled ===

impl<T: Send + 'static, U: Send + 'static, O: Send + 'static> Settled<T, U, O> {
    fn finish(self) {
        let Self {
            done,
            output,
            left,
            right,
        } = self;
        if let (Some(done), Some(output)) = (done, output) {
            done.complete(output);
        }
        if matches!(left, Slot::Pending(_)) || matches!(right, Slot::Pending(_)) {
            tracing::trace!("combined task resolved early; releasing the other child");
        }
        drop((left, right));
    }
}
