//! Shared queue of pending work items with completion tracking.
//!
//! [`WorkQueue`] hands out each enqueued [`WorkItem`] to exactly one caller of
//! [`try_withdraw`](WorkQueue::try_withdraw) and counts every item as outstanding until it has
//! been acknowledged with [`mark_done`](WorkQueue::mark_done). Withdrawn items that are still
//! being processed stay outstanding, so [`wait_until_drained`](WorkQueue::wait_until_drained)
//! resolves only once the last item is done.
//!
//! The item collection and the outstanding count live behind one mutex, so a withdrawal and a
//! drain check can never observe each other half-way.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::workload::WorkItem;

/// A thread-safe queue of pending work items.
///
/// Cloning the queue yields another handle to the same items.
#[derive(Clone, Debug, Default)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    drained: Notify,
}

#[derive(Debug, Default)]
struct State {
    pending: VecDeque<WorkItem>,
    outstanding: usize,
}

impl WorkQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // No critical section can panic half-way, so a poisoned state is still consistent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds one item and counts it as outstanding.
    pub fn enqueue(&self, item: WorkItem) {
        let mut state = self.state();
        state.pending.push_back(item);
        state.outstanding += 1;
    }

    /// Removes and returns the next item, or `None` if no items are pending.
    ///
    /// This never blocks waiting for new items. The returned item remains outstanding until
    /// [`mark_done`](Self::mark_done) is called for it.
    pub fn try_withdraw(&self) -> Option<WorkItem> {
        self.state().pending.pop_front()
    }

    /// Withdraws the next item wrapped in a [`Claim`] that marks it done when dropped.
    pub fn try_claim(&self) -> Option<Claim<'_>> {
        let item = self.try_withdraw()?;
        Some(Claim { queue: self, item })
    }

    /// Acknowledges that one withdrawn item has been processed, successfully or not.
    pub fn mark_done(&self) {
        let drained = {
            let mut state = self.state();
            let Some(outstanding) = state.outstanding.checked_sub(1) else {
                drop(state);
                tracing::error!("work item marked done more often than enqueued");
                return;
            };
            state.outstanding = outstanding;
            outstanding == 0
        };

        if drained {
            self.inner.drained.notify_waiters();
        }
    }

    /// Drops all items that have not been withdrawn yet and returns how many there were.
    ///
    /// The dropped items no longer count as outstanding. Items that are currently being
    /// processed are unaffected and still need to be marked done.
    pub fn abandon_pending(&self) -> usize {
        let (abandoned, drained) = {
            let mut state = self.state();
            let abandoned = state.pending.len();
            state.pending.clear();
            state.outstanding -= abandoned;
            (abandoned, abandoned > 0 && state.outstanding == 0)
        };

        if drained {
            self.inner.drained.notify_waiters();
        }
        abandoned
    }

    /// Returns the number of items that have been enqueued but not yet marked done.
    pub fn outstanding(&self) -> usize {
        self.state().outstanding
    }

    /// Returns the number of items that have not been withdrawn yet.
    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    /// Waits until every enqueued item has been withdrawn and marked done.
    ///
    /// Returns immediately if the queue holds no outstanding items.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.inner.drained.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Extend<WorkItem> for WorkQueue {
    fn extend<T: IntoIterator<Item = WorkItem>>(&mut self, iter: T) {
        let mut state = self.state();
        for item in iter {
            state.pending.push_back(item);
            state.outstanding += 1;
        }
    }
}

impl FromIterator<WorkItem> for WorkQueue {
    fn from_iter<T: IntoIterator<Item = WorkItem>>(iter: T) -> Self {
        let mut queue = Self::new();
        queue.extend(iter);
        queue
    }
}

/// RAII guard for a withdrawn work item.
///
/// Dropping the claim marks the item done, including when the processing task unwinds.
#[derive(Debug)]
pub struct Claim<'q> {
    queue: &'q WorkQueue,
    item: WorkItem,
}

impl Claim<'_> {
    /// The claimed item.
    pub fn item(&self) -> &WorkItem {
        &self.item
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.queue.mark_done();
    }
}
