use std::{
    fmt,
    sync::{Condvar, Mutex, PoisonError},
    time::Duration,
};

/// A counting latch that threads can block on until its count drops to zero.
///
/// Work is registered with [`enter`] and released with [`leave`]; [`wait`]
/// and [`wait_timeout`] block the calling thread until every entered unit of
/// work has left. A latch whose count is already zero never blocks.
///
/// This is the only primitive in the workspace that parks a thread, so it is
/// built on the operating system's condition variable rather than on
/// [`blocking::Mutex`](super::blocking::Mutex), which spins.
///
/// [`enter`]: Latch::enter
/// [`leave`]: Latch::leave
/// [`wait`]: Latch::wait
/// [`wait_timeout`]: Latch::wait_timeout
pub struct Latch {
    count: Mutex<usize>,
    zero: Condvar,
}

impl Latch {
    /// Returns a new latch with a count of zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: Mutex::new(0),
            zero: Condvar::new(),
        }
    }

    /// Increments the latch's count.
    pub fn enter(&self) {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    }

    /// Decrements the latch's count, waking every waiter if it reaches zero.
    ///
    /// # Panics
    ///
    /// If the count is already zero, i.e. `leave` was called more times than
    /// [`enter`](Self::enter).
    #[track_caller]
    pub fn leave(&self) {
        let remaining = {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(remaining) = count.checked_sub(1) else {
                drop(count);
                panic!("`Latch::leave` called more times than `Latch::enter`");
            };
            *count = remaining;
            remaining
        };

        if remaining == 0 {
            self.zero.notify_all();
        }
    }

    /// Returns the number of units of work that have entered but not left.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks the current thread until the count reaches zero.
    pub fn wait(&self) {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let _count = self
            .zero
            .wait_while(count, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Blocks the current thread until the count reaches zero or `timeout`
    /// elapses.
    ///
    /// Returns `true` if the count reached zero, and `false` if the wait
    /// timed out first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (count, _) = self
            .zero
            .wait_timeout_while(count, timeout, |count| *count > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *count == 0
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("count", &self.count())
            .finish()
    }
}
