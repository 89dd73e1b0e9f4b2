use std::collections::HashMap;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use super::types::{
    BatchId, BatchStatus, ItemId, ItemStatus, Payload, RemoteReference, UploadBatch, UploadItem,
};

/// Owns one batch and the payloads of its items
///
/// Every mutation goes through here so the derived status and the
/// timestamps are recomputed in the same step as the item change.
pub(crate) struct BatchTracker {
    batch: UploadBatch,
    payloads: HashMap<ItemId, Payload>,
    cancellation: CancellationToken,
}

impl BatchTracker {
    pub fn new(
        id: BatchId,
        entity_id: String,
        entity_name: String,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        let mut items = Vec::with_capacity(files.len());
        let mut payloads = HashMap::with_capacity(files.len());

        for payload in files {
            let item = UploadItem::new(payload.info());
            payloads.insert(item.id, payload);
            items.push(item);
        }

        let mut batch = UploadBatch {
            id,
            entity_id,
            entity_name,
            metadata,
            items,
            status: BatchStatus::Queued,
            created_at: now,
            started_at: None,
            completed_at: None,
        };

        // An empty batch has nothing to wait for
        if batch.items.is_empty() {
            batch.status = BatchStatus::Completed;
            batch.started_at = Some(now);
            batch.completed_at = Some(now);
        }

        Self {
            batch,
            payloads,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn snapshot(&self) -> &UploadBatch {
        &self.batch
    }

    pub fn is_terminal(&self) -> bool {
        self.batch.status.is_terminal()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.batch.items.iter().map(|item| item.id).collect()
    }

    pub fn item(&self, item_id: &ItemId) -> Option<&UploadItem> {
        self.batch.items.iter().find(|item| item.id == *item_id)
    }

    pub fn item_index(&self, item_id: &ItemId) -> Option<usize> {
        self.batch.items.iter().position(|item| item.id == *item_id)
    }

    fn item_mut(&mut self, item_id: &ItemId) -> Option<&mut UploadItem> {
        self.batch.items.iter_mut().find(|item| item.id == *item_id)
    }

    /// Payload for dispatch; the tracker keeps its own handle until the item settles
    pub fn payload(&self, item_id: &ItemId) -> Option<Payload> {
        self.payloads.get(item_id).cloned()
    }

    /// Payloads of failed items, in insertion order
    pub fn failed_payloads(&self) -> Vec<Payload> {
        self.batch
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .filter_map(|item| self.payloads.get(&item.id).cloned())
            .collect()
    }

    /// Apply a forward transition; returns `false` when it is not allowed
    pub fn transition(&mut self, item_id: &ItemId, next: ItemStatus) -> bool {
        let now = Utc::now();
        let Some(item) = self.item_mut(item_id) else {
            return false;
        };

        if !item.status.can_transition_to(next) {
            return false;
        }

        if item.status == ItemStatus::Queued && next != ItemStatus::Cancelled {
            item.started_at = Some(now);
        }
        item.status = next;
        if next.is_terminal() {
            item.completed_at = Some(now);
        }

        self.recompute();
        true
    }

    /// Only applied while uploading, and never backwards
    pub fn set_progress(&mut self, item_id: &ItemId, percent: u8) -> bool {
        let Some(item) = self.item_mut(item_id) else {
            return false;
        };

        if item.status != ItemStatus::Uploading || percent <= item.progress {
            return false;
        }

        item.progress = percent.min(100);
        true
    }

    pub fn set_warning(&mut self, item_id: &ItemId, warning: String) -> bool {
        match self.item_mut(item_id) {
            Some(item) if !item.status.is_terminal() => {
                item.warning = Some(warning);
                true
            }
            _ => false,
        }
    }

    pub fn complete(&mut self, item_id: &ItemId, reference: RemoteReference) -> bool {
        if !self.transition(item_id, ItemStatus::Completed) {
            return false;
        }

        if let Some(item) = self.item_mut(item_id) {
            item.progress = 100;
            item.result = Some(reference);
        }
        self.payloads.remove(item_id);
        true
    }

    pub fn fail(&mut self, item_id: &ItemId, error: String) -> bool {
        if !self.transition(item_id, ItemStatus::Failed) {
            return false;
        }

        if let Some(item) = self.item_mut(item_id) {
            item.error = Some(error);
        }
        true
    }

    pub fn cancel_item(&mut self, item_id: &ItemId) -> bool {
        if !self.transition(item_id, ItemStatus::Cancelled) {
            return false;
        }

        self.payloads.remove(item_id);
        true
    }

    /// Cancel every non-terminal item; returns the ones that changed
    pub fn cancel(&mut self) -> Vec<ItemId> {
        let pending: Vec<ItemId> = self
            .batch
            .items
            .iter()
            .filter(|item| !item.status.is_terminal())
            .map(|item| item.id)
            .collect();

        if pending.is_empty() {
            return pending;
        }

        self.cancellation.cancel();
        pending
            .into_iter()
            .filter(|item_id| self.cancel_item(item_id))
            .collect()
    }

    fn recompute(&mut self) {
        let status = BatchStatus::derive(self.batch.items.iter().map(|item| &item.status));
        let now = Utc::now();

        if self.batch.started_at.is_none() && status != BatchStatus::Queued {
            self.batch.started_at = Some(now);
        }
        if self.batch.completed_at.is_none() && status.is_terminal() {
            self.batch.completed_at = Some(now);
        }

        self.batch.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(files: usize) -> BatchTracker {
        let payloads = (0..files)
            .map(|i| Payload::new(format!("photo-{i}.jpg"), "image/jpeg", vec![0u8; 16]))
            .collect();
        BatchTracker::new(
            BatchId::new(),
            "f1".to_string(),
            "Site A".to_string(),
            payloads,
            HashMap::new(),
        )
    }

    fn reference(url: &str) -> RemoteReference {
        RemoteReference { url: url.to_string(), id: None }
    }

    #[test]
    fn test_empty_batch_is_completed() {
        let tracker = tracker(0);
        assert_eq!(tracker.snapshot().status, BatchStatus::Completed);
        assert!(tracker.snapshot().started_at.is_some());
        assert!(tracker.snapshot().completed_at.is_some());
    }

    #[test]
    fn test_status_follows_items() {
        let mut tracker = tracker(2);
        let ids = tracker.item_ids();
        assert_eq!(tracker.snapshot().status, BatchStatus::Queued);

        assert!(tracker.transition(&ids[0], ItemStatus::Uploading));
        assert_eq!(tracker.snapshot().status, BatchStatus::Active);
        let started = tracker.snapshot().started_at;
        assert!(started.is_some());

        assert!(tracker.complete(&ids[0], reference("https://cdn/a")));
        // Second item is still waiting for a slot
        assert_eq!(tracker.snapshot().status, BatchStatus::Active);

        assert!(tracker.transition(&ids[1], ItemStatus::Uploading));
        assert!(tracker.fail(&ids[1], "HTTP 500".to_string()));
        assert_eq!(tracker.snapshot().status, BatchStatus::Completed);
        assert_eq!(tracker.snapshot().started_at, started);
        assert!(tracker.snapshot().completed_at.is_some());
        assert_eq!(tracker.snapshot().results().len(), 1);
    }

    #[test]
    fn test_all_failed_is_failed() {
        let mut tracker = tracker(2);
        for id in tracker.item_ids() {
            tracker.transition(&id, ItemStatus::Uploading);
            tracker.fail(&id, "boom".to_string());
        }
        assert_eq!(tracker.snapshot().status, BatchStatus::Failed);
        assert_eq!(tracker.failed_payloads().len(), 2);
    }

    #[test]
    fn test_terminal_items_are_immutable() {
        let mut tracker = tracker(1);
        let id = tracker.item_ids()[0];

        tracker.transition(&id, ItemStatus::Uploading);
        tracker.complete(&id, reference("https://cdn/a"));

        assert!(!tracker.transition(&id, ItemStatus::Cancelled));
        assert!(!tracker.fail(&id, "late".to_string()));
        assert!(!tracker.set_progress(&id, 50));
        let item = tracker.item(&id).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.progress, 100);
        assert!(item.error.is_none());
    }

    #[test]
    fn test_progress_only_while_uploading() {
        let mut tracker = tracker(1);
        let id = tracker.item_ids()[0];

        assert!(!tracker.set_progress(&id, 10));
        tracker.transition(&id, ItemStatus::Compressing);
        assert!(!tracker.set_progress(&id, 10));
        tracker.transition(&id, ItemStatus::Uploading);
        assert!(tracker.set_progress(&id, 10));
        assert!(!tracker.set_progress(&id, 5));
        assert_eq!(tracker.item(&id).unwrap().progress, 10);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut tracker = tracker(3);
        let ids = tracker.item_ids();
        tracker.transition(&ids[0], ItemStatus::Uploading);
        tracker.complete(&ids[0], reference("https://cdn/a"));

        let cancelled = tracker.cancel();
        assert_eq!(cancelled.len(), 2);
        assert!(tracker.cancellation().is_cancelled());
        assert_eq!(tracker.snapshot().status, BatchStatus::Cancelled);

        assert!(tracker.cancel().is_empty());
        assert!(tracker.payload(&ids[1]).is_none());
    }
}
