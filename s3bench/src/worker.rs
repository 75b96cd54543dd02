//! Workers draining the shared [`WorkQueue`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use s3bench_store::{SharedStore, StoreResult};
use sketches_ddsketch::DDSketch;
use tokio_util::sync::CancellationToken;

use crate::queue::WorkQueue;
use crate::workload::{Operation, WorkItem};

/// Counts failures in a row across all workers of a run.
///
/// Any success resets the count. Once it reaches the limit the tracker trips, which signals that
/// the store is most likely unavailable as a whole.
#[derive(Debug)]
pub struct FailureTracker {
    limit: u64,
    consecutive: AtomicU64,
    tripped: AtomicBool,
}

impl FailureTracker {
    /// Creates a tracker tripping after `limit` consecutive failures. A limit of `0` never trips.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            consecutive: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
        }
    }

    /// Resets the consecutive failure count.
    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }

    /// Records a failure and returns `true` if this failure tripped the tracker.
    pub fn record_failure(&self) -> bool {
        let consecutive = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if self.limit == 0 || consecutive < self.limit {
            return false;
        }
        !self.tripped.swap(true, Ordering::Relaxed)
    }

    /// Returns `true` if the limit has been reached during this run.
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Relaxed)
    }

    /// The configured limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

/// Measurements collected by a single worker.
#[derive(Default)]
pub struct WorkerMetrics {
    /// Latency of successful operations in seconds.
    pub timing: DDSketch,
    /// Payload bytes written or read.
    pub bytes: u64,
    /// Number of successful operations.
    pub succeeded: u64,
    /// Number of failed operations.
    pub failed: u64,
}

impl fmt::Debug for WorkerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerMetrics")
            .field("ops", &self.timing.count())
            .field("bytes", &self.bytes)
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .finish()
    }
}

impl WorkerMetrics {
    fn record_success(&mut self, elapsed: Duration, bytes: u64) {
        self.timing.add(elapsed.as_secs_f64());
        self.bytes += bytes;
        self.succeeded += 1;
    }

    /// Adds the measurements of `other` to these.
    pub fn merge(&mut self, other: &WorkerMetrics) {
        if let Err(error) = self.timing.merge(&other.timing) {
            tracing::warn!(%error, "failed to merge latency sketches");
        }
        self.bytes += other.bytes;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

/// Everything a worker needs, handed to it explicitly at construction.
///
/// The store is shared read-only; the queue is the only mutable shared state.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// The queue all workers of a run drain.
    pub queue: WorkQueue,
    /// The store every operation runs against.
    pub store: SharedStore,
    /// The operation performed for every item.
    pub operation: Operation,
    /// Checked between withdrawals; set to stop the run early.
    pub cancel: CancellationToken,
    /// Consecutive failures across the run.
    pub failures: Arc<FailureTracker>,
    /// Advanced once per processed item.
    pub progress: ProgressBar,
}

/// One concurrent execution unit of the worker pool.
///
/// A worker repeatedly withdraws an item and performs the run's operation for it, until the queue
/// is empty or the run is cancelled. It never waits for new items.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    ctx: RunContext,
}

impl Worker {
    /// Creates a worker with the given identifier, used in logs.
    pub fn new(id: usize, ctx: RunContext) -> Self {
        Self { id, ctx }
    }

    /// Processes items until the queue is exhausted and returns the collected metrics.
    #[tracing::instrument(level = "debug", fields(worker = self.id), skip_all)]
    pub async fn run(self) -> WorkerMetrics {
        let mut metrics = WorkerMetrics::default();

        loop {
            if self.ctx.cancel.is_cancelled() {
                tracing::debug!("worker cancelled");
                break;
            }
            let Some(claim) = self.ctx.queue.try_claim() else {
                break;
            };

            let item = claim.item();
            let start = Instant::now();
            let tripped = match self.perform(item).await {
                Ok(bytes) => {
                    let elapsed = start.elapsed();
                    tracing::debug!(key = item.key(), ?elapsed, "{} succeeded", self.ctx.operation);
                    metrics.record_success(elapsed, bytes);
                    self.ctx.failures.record_success();
                    false
                }
                Err(error) => {
                    tracing::error!(
                        error = &error as &dyn std::error::Error,
                        key = item.key(),
                        "{} failed",
                        self.ctx.operation
                    );
                    metrics.failed += 1;
                    self.ctx.failures.record_failure()
                }
            };

            drop(claim);
            self.ctx.progress.inc(1);

            if tripped {
                tracing::error!(
                    limit = self.ctx.failures.limit(),
                    "too many consecutive failures, stopping run"
                );
                self.ctx.cancel.cancel();
            }
        }

        metrics
    }

    /// Performs the operation for one item, returning the number of payload bytes transferred.
    async fn perform(&self, item: &WorkItem) -> StoreResult<u64> {
        match self.ctx.operation {
            Operation::Upload => {
                let payload = item.payload().cloned().unwrap_or_default();
                let len = payload.len() as u64;
                self.ctx.store.put_object(item.key(), payload).await?;
                Ok(len)
            }
            Operation::Download => {
                let contents = self.ctx.store.get_object(item.key()).await?;
                Ok(contents.len() as u64)
            }
            Operation::Delete => {
                self.ctx.store.delete_object(item.key()).await?;
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use s3bench_store::InMemoryStore;

    use super::*;
    use crate::workload::{Workload, generate_payload};

    fn worker(queue: &WorkQueue, store: &InMemoryStore, operation: Operation) -> Worker {
        let ctx = RunContext {
            queue: queue.clone(),
            store: Arc::new(store.clone()),
            operation,
            cancel: CancellationToken::new(),
            failures: Arc::new(FailureTracker::new(0)),
            progress: ProgressBar::hidden(),
        };
        Worker::new(0, ctx)
    }

    #[test]
    fn tracker_trips_once() {
        let tracker = FailureTracker::new(2);
        assert!(!tracker.record_failure());
        tracker.record_success();
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.is_tripped());
    }

    #[test]
    fn tracker_without_limit_never_trips() {
        let tracker = FailureTracker::new(0);
        for _ in 0..1000 {
            assert!(!tracker.record_failure());
        }
        assert!(!tracker.is_tripped());
    }

    #[tokio::test]
    async fn uploads_every_item() {
        let store = InMemoryStore::new();
        let workload = Workload::builder("w/")
            .count(10)
            .payload(generate_payload(32, 1))
            .build();
        let queue: WorkQueue = workload.items().collect();

        let metrics = worker(&queue, &store, Operation::Upload).run().await;

        assert_eq!(metrics.succeeded, 10);
        assert_eq!(metrics.failed, 0);
        assert_eq!(metrics.bytes, 320);
        assert_eq!(metrics.timing.count(), 10);
        assert_eq!(queue.outstanding(), 0);
        assert_eq!(store.len(), 10);
        assert_eq!(store.get_stored("w/testfile-9").unwrap().len(), 32);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_worker() {
        let store = InMemoryStore::new();
        store.insert("testfile-1", "abc");
        let queue: WorkQueue = Workload::builder("").count(3).build().items().collect();

        let metrics = worker(&queue, &store, Operation::Download).run().await;

        assert_eq!(metrics.succeeded, 1);
        assert_eq!(metrics.failed, 2);
        assert_eq!(metrics.bytes, 3);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test]
    async fn cancelled_worker_withdraws_nothing() {
        let store = InMemoryStore::new();
        let queue: WorkQueue = Workload::builder("").count(3).build().items().collect();

        let worker = worker(&queue, &store, Operation::Delete);
        worker.ctx.cancel.cancel();
        let metrics = worker.run().await;

        assert_eq!(metrics.succeeded + metrics.failed, 0);
        assert_eq!(queue.pending(), 3);
    }

    #[test]
    fn merges_metrics() {
        let mut total = WorkerMetrics::default();
        let mut one = WorkerMetrics::default();
        one.record_success(Duration::from_millis(5), 10);
        one.failed = 2;

        total.merge(&one);
        total.merge(&one);

        assert_eq!(total.succeeded, 2);
        assert_eq!(total.failed, 4);
        assert_eq!(total.bytes, 20);
        assert_eq!(total.timing.count(), 2);
    }
}
