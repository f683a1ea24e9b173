#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod guard;
pub mod queue;
pub mod sync;

pub use guard::{guard, DropGuard};
pub use queue::{Executor, Job, Queue, ThreadExecutor};
