//! Coordinates a single run against the object store.
//!
//! A [`Coordinator`] moves through the states of [`RunState`]: it seeds a [`WorkQueue`] with the
//! run's [`Workload`], starts the [`WorkerPool`], blocks until the queue is drained and finally
//! produces a [`RunResult`] with the elapsed wall-clock time.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use indicatif::ProgressBar;
use s3bench_store::{SharedStore, StoreError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, RunConfig, validate_workers};
use crate::pool::WorkerPool;
use crate::queue::WorkQueue;
use crate::worker::{FailureTracker, RunContext, WorkerMetrics};
use crate::workload::{Operation, Workload};

/// Key prefix listed to check that the store is reachable. It is not expected to match anything.
const PROBE_KEY: &str = ".s3bench-connectivity-check";

/// Errors that end a run without a regular [`RunResult`].
#[derive(Debug, Error)]
pub enum RunError {
    /// The run parameters are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The store could not be reached before starting; no work was done.
    #[error("object store is unreachable")]
    Unreachable(#[source] StoreError),

    /// The run was stopped because too many operations in a row failed.
    #[error("run aborted after {consecutive_failures} consecutive failures")]
    Aborted {
        /// The limit that was reached.
        consecutive_failures: u64,
        /// Measurements up to the point of abortion.
        result: Box<RunResult>,
    },

    /// [`Coordinator::run`] was called more than once.
    #[error("run has already been started")]
    AlreadyStarted,
}

/// The lifecycle of a [`Coordinator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
    /// Nothing has happened yet.
    Idle,
    /// The queue is being filled.
    Seeding,
    /// Workers are draining the queue.
    Running,
    /// All items have been processed and the result is available.
    Complete,
}

/// The outcome of a run.
pub struct RunResult {
    /// The operation that was performed.
    pub operation: Operation,
    /// Number of concurrent workers.
    pub workers: usize,
    /// Number of enqueued items.
    pub total: usize,
    /// Items that were never withdrawn because the run was cancelled.
    pub skipped: usize,
    /// Whether the run was stopped before all items were processed.
    pub cancelled: bool,
    /// Wall-clock time right before the workers started.
    pub started_at: SystemTime,
    /// Wall-clock time right after the queue was drained.
    pub finished_at: SystemTime,
    /// Time between starting the workers and draining the queue.
    pub elapsed: Duration,
    /// Merged measurements of all workers.
    pub metrics: WorkerMetrics,
}

impl RunResult {
    /// Number of items that were withdrawn and processed, successfully or not.
    pub fn processed(&self) -> u64 {
        self.metrics.succeeded + self.metrics.failed
    }

    /// Number of successful operations.
    pub fn succeeded(&self) -> u64 {
        self.metrics.succeeded
    }

    /// Number of failed operations.
    pub fn failed(&self) -> u64 {
        self.metrics.failed
    }

    /// Number of payload bytes written or read.
    pub fn bytes(&self) -> u64 {
        self.metrics.bytes
    }
}

impl fmt::Debug for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunResult")
            .field("operation", &self.operation)
            .field("workers", &self.workers)
            .field("total", &self.total)
            .field("skipped", &self.skipped)
            .field("cancelled", &self.cancelled)
            .field("elapsed", &self.elapsed)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Drives one run from seeding the queue to reporting the elapsed time.
#[derive(Debug)]
pub struct Coordinator {
    store: SharedStore,
    config: RunConfig,
    cancel: CancellationToken,
    progress: ProgressBar,
    seed: u64,
    state: RunState,
}

impl Coordinator {
    /// Creates a coordinator for the given store and validated configuration.
    pub fn new(store: SharedStore, config: RunConfig) -> Self {
        Self {
            store,
            config,
            cancel: CancellationToken::new(),
            progress: ProgressBar::hidden(),
            seed: rand::random(),
            state: RunState::Idle,
        }
    }

    /// Uses the given token to stop the run early.
    ///
    /// Once cancelled, workers stop withdrawing new items and the run completes as soon as the
    /// items in flight are done.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Reports progress on the given bar. The length is set when the run starts.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Seed for generating the upload payload.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The current state of this coordinator.
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, state: RunState) {
        tracing::debug!(from = ?self.state, to = ?state, "run state changed");
        self.state = state;
    }

    async fn check_connectivity(&self) -> Result<(), RunError> {
        let probe = format!("{}{PROBE_KEY}", self.config.prefix);
        match self.store.list_objects(&probe).await {
            Ok(_) => Ok(()),
            Err(error) => {
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    store = self.store.name(),
                    "object store is unreachable"
                );
                Err(RunError::Unreachable(error))
            }
        }
    }

    /// Performs the run and waits for all of its items to be processed.
    pub async fn run(&mut self) -> Result<RunResult, RunError> {
        if self.state != RunState::Idle {
            return Err(RunError::AlreadyStarted);
        }
        let workers = validate_workers(self.config.workers)?;
        self.check_connectivity().await?;

        self.transition(RunState::Seeding);
        let workload = Workload::for_run(&self.config, self.seed);
        let total = workload.len();
        let queue: WorkQueue = workload.items().collect();
        drop(workload);

        self.transition(RunState::Running);
        let failures = Arc::new(FailureTracker::new(self.config.max_consecutive_failures));
        let ctx = RunContext {
            queue: queue.clone(),
            store: Arc::clone(&self.store),
            operation: self.config.operation,
            cancel: self.cancel.clone(),
            failures: Arc::clone(&failures),
            progress: self.progress.clone(),
        };
        self.progress.set_length(total as u64);

        tracing::info!(
            operation = %self.config.operation,
            bucket = %self.config.bucket,
            prefix = %self.config.prefix,
            count = total,
            workers,
            payload_size = self.config.payload_size,
            "starting run"
        );

        let started_at = SystemTime::now();
        let start = Instant::now();
        let pool = WorkerPool::start(workers, &ctx)?;

        // A cancellation that arrives once all items are done does not count.
        let cancelled = tokio::select! {
            biased;
            _ = queue.wait_until_drained() => false,
            _ = self.cancel.cancelled() => true,
        };
        let skipped = if cancelled {
            let skipped = queue.abandon_pending();
            tracing::warn!(skipped, "run cancelled, waiting for operations in flight");
            queue.wait_until_drained().await;
            skipped
        } else {
            0
        };

        let elapsed = start.elapsed();
        let finished_at = SystemTime::now();
        let metrics = pool.join().await;
        self.progress.finish_and_clear();
        self.transition(RunState::Complete);

        let result = RunResult {
            operation: self.config.operation,
            workers,
            total,
            skipped,
            cancelled,
            started_at,
            finished_at,
            elapsed,
            metrics,
        };

        tracing::info!(
            operation = %result.operation,
            count = result.total,
            workers = result.workers,
            elapsed_ms = result.elapsed.as_millis() as u64,
            succeeded = result.succeeded(),
            failed = result.failed(),
            skipped = result.skipped,
            cancelled = result.cancelled,
            "run complete"
        );

        if cancelled && failures.is_tripped() {
            return Err(RunError::Aborted {
                consecutive_failures: failures.limit(),
                result: Box::new(result),
            });
        }

        Ok(result)
    }
}
