//! Synchronization primitives.
//!
//! Everything in this workspace that has mutable state shared between threads
//! guards it with the [`blocking::Mutex`] re-exported here, always through
//! [`Mutex::with_lock`], so that no guard can outlive the scope that took it.
//! Externally supplied closures are never invoked while a lock is held, so
//! the lock does not need to be re-entrant.
//!
//! [`Mutex::with_lock`]: blocking::Mutex::with_lock
pub use core::sync::atomic;

pub use maitake_sync::blocking;
pub use maitake_sync::blocking::Mutex;

mod latch;
pub use self::latch::Latch;
