//! Drop guards.
//!
//! See the [`DropGuard`] type and the [`guard`] function for more information.

/// Runs a closure exactly once, when the guard is dropped.
///
/// This is how a task's cancellation closure is tied to the lifetime of the
/// task: the guard is stored alongside the task's state, so the closure runs
/// when the last reference to the task goes away, whether or not the task's
/// work ever ran.
#[must_use = "dropping a `DropGuard` immediately runs its closure"]
pub struct DropGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> DropGuard<F> {
    /// Returns a guard that will run `f` when it is dropped.
    #[inline]
    pub const fn new(f: F) -> Self {
        Self(Some(f))
    }

    /// Returns `true` if dropping this guard will still run its closure.
    #[inline]
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.0.is_some()
    }
}

impl<F: FnOnce()> Drop for DropGuard<F> {
    #[inline]
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f()
        }
    }
}

impl<F: FnOnce()> core::fmt::Debug for DropGuard<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DropGuard")
            .field("armed", &self.is_armed())
            .field("f", &format_args!("{}", core::any::type_name::<F>()))
            .finish()
    }
}

/// Returns a guard that runs `f` when it is dropped.
///
/// This is equivalent to calling `DropGuard::new(f)`. See [`DropGuard`] for
/// more details.
#[inline(always)]
pub fn guard<F: FnOnce()>(f: F) -> DropGuard<F> {
    DropGuard::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_once_on_drop() {
        let calls = AtomicUsize::new(0);
        {
            let _guard = guard(|| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_reports_an_armed_guard() {
        let armed = guard(|| {});
        assert!(armed.is_armed());
        assert!(format!("{armed:?}").starts_with("DropGuard { armed: true"));
    }
}
