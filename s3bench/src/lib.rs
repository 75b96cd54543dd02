//! A load generator for object stores exposing an S3-compatible API.
//!
//! A run issues a fixed number of uploads, downloads or deletes against one bucket. The objects
//! are named `<prefix>testfile-<index>` and described by a [`Workload`]. All items are put into a
//! shared [`WorkQueue`](queue::WorkQueue) up front, and a fixed-size
//! [`WorkerPool`](pool::WorkerPool) races for them until the queue is exhausted. The
//! [`Coordinator`] waits until every item has been processed exactly once and reports the
//! elapsed wall-clock time in a [`RunResult`].
//!
//! A failing operation only fails its item. If too many operations fail in a row, the store is
//! considered unavailable and the run is aborted early. Runs can also be stopped through a
//! cancellation token, in which case the items that were not started are skipped.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod report;
pub mod run;
pub mod worker;
pub mod workload;

pub use crate::config::RunConfig;
pub use crate::run::{Coordinator, RunError, RunResult, RunState};
pub use crate::workload::{Operation, Workload};
