use std::collections::{HashSet, VecDeque};
use super::types::{BatchId, ItemId};

/// One pending unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkItem {
    pub batch_id: BatchId,
    pub item_id: ItemId,
}

/// FIFO dispatch bookkeeping under a concurrency ceiling
///
/// Items are pending in batch-arrival order, then item order within the
/// batch. A slot is held from dispatch until the worker reports back, so a
/// lowered ceiling only affects the next dispatch decision.
#[derive(Debug)]
pub(crate) struct Scheduler {
    pending: VecDeque<WorkItem>,
    in_flight: HashSet<ItemId>,
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            in_flight: HashSet::new(),
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn enqueue(&mut self, batch_id: BatchId, items: impl IntoIterator<Item = ItemId>) {
        self.pending
            .extend(items.into_iter().map(|item_id| WorkItem { batch_id, item_id }));
    }

    pub fn set_max_concurrency(&mut self, max_concurrency: usize) {
        self.max_concurrency = max_concurrency.max(1);
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.max_concurrency
    }

    /// Pop the oldest pending item and occupy a slot for it
    pub fn next(&mut self) -> Option<WorkItem> {
        if !self.has_capacity() {
            return None;
        }

        let work = self.pending.pop_front()?;
        self.in_flight.insert(work.item_id);
        Some(work)
    }

    /// Release the slot held by `item_id`
    pub fn finish(&mut self, item_id: &ItemId) -> bool {
        self.in_flight.remove(item_id)
    }

    /// Drop the pending (not yet dispatched) items of a batch
    pub fn remove_batch(&mut self, batch_id: &BatchId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|work| work.batch_id != *batch_id);
        before - self.pending.len()
    }

    /// Forget all pending work; in-flight slots stay until their workers report
    pub fn clear_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}
