#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]
#![warn(rustdoc::broken_intra_doc_links)]

#[macro_use]
pub(crate) mod util;

pub mod blocking;
pub mod combine;
pub mod pending;
pub mod polling;
mod sequence;
pub mod task;
mod transform;

#[doc(inline)]
pub use self::blocking::{sync, try_sync, Elapsed};
#[doc(inline)]
pub use self::combine::combine;
#[doc(inline)]
pub use self::pending::PendingTask;
#[doc(inline)]
pub use self::polling::PollingTask;
#[doc(inline)]
pub use self::task::{Completion, Ownership, Task, TaskId};
pub use self::transform::BoxError;
pub use deferred_util::queue::{Executor, Queue, ThreadExecutor};

/// A [`Task`] producing a [`Result`].
pub type ResultTask<T, E> = Task<Result<T, E>>;
