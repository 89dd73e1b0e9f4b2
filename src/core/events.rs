use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use super::types::{BatchId, QueueEvent, QueueStats, UploadBatch};

/// Receives a full batch snapshot on every change; `None` until the batch exists
pub type BatchWatch = watch::Receiver<Option<UploadBatch>>;

/// Receives the aggregate stats whenever any count changes
pub type StatsWatch = watch::Receiver<QueueStats>;

/// Observation channels shared by every handle and the manager worker
///
/// Only the manager worker publishes. Handles subscribe, which for batch
/// channels may happen before the batch is registered.
#[derive(Clone)]
pub(crate) struct Observers {
    batches: Arc<Mutex<HashMap<BatchId, watch::Sender<Option<UploadBatch>>>>>,
    stats: Arc<watch::Sender<QueueStats>>,
    events: broadcast::Sender<QueueEvent>,
}

impl Observers {
    pub fn new(event_capacity: usize) -> Self {
        let (stats, _) = watch::channel(QueueStats::default());
        let (events, _) = broadcast::channel(event_capacity.max(1));

        Self {
            batches: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(stats),
            events,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<BatchId, watch::Sender<Option<UploadBatch>>>> {
        // A panicking publisher cannot leave the map half-written
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe_batch(&self, batch_id: BatchId) -> BatchWatch {
        self.registry()
            .entry(batch_id)
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    pub fn subscribe_stats(&self) -> StatsWatch {
        self.stats.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats.borrow().clone()
    }

    pub fn publish_batch(&self, batch: &UploadBatch) {
        let mut registry = self.registry();
        match registry.get(&batch.id) {
            Some(sender) => {
                sender.send_replace(Some(batch.clone()));
            }
            None => {
                registry.insert(batch.id, watch::channel(Some(batch.clone())).0);
            }
        }
    }

    /// Returns whether subscribers were notified
    pub fn publish_stats(&self, stats: QueueStats) -> bool {
        self.stats.send_if_modified(|current| {
            if *current == stats {
                return false;
            }
            *current = stats;
            true
        })
    }

    /// Fire-and-forget; nobody listening is not an error
    pub fn broadcast(&self, event: QueueEvent) {
        let _ = self.events.send(event);
    }

    /// Closes the batch channel; receivers see `changed()` fail
    pub fn remove_batch(&self, batch_id: &BatchId) {
        self.registry().remove(batch_id);
    }

    /// Drop channels for ids that never became a batch and lost all receivers
    pub fn prune(&self, is_live: impl Fn(&BatchId) -> bool) {
        self.registry()
            .retain(|batch_id, sender| is_live(batch_id) || sender.receiver_count() > 0);
    }

    pub fn clear(&self) {
        self.registry().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use chrono::Utc;
    use crate::core::types::BatchStatus;

    fn batch(id: BatchId) -> UploadBatch {
        UploadBatch {
            id,
            entity_id: "f1".to_string(),
            entity_name: "Site A".to_string(),
            metadata: Map::new(),
            items: Vec::new(),
            status: BatchStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn test_subscribe_before_publish() {
        let observers = Observers::new(8);
        let id = BatchId::new();
        let mut rx = observers.subscribe_batch(id);
        assert!(rx.borrow().is_none());

        observers.publish_batch(&batch(id));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().id, id);

        observers.remove_batch(&id);
        assert!(rx.changed().await.is_err());
    }

    #[test]
    fn test_stats_are_coalesced() {
        let observers = Observers::new(8);
        let mut rx = observers.subscribe_stats();

        assert!(!observers.publish_stats(QueueStats::default()));
        assert!(!rx.has_changed().unwrap());

        let stats = QueueStats { total_batches: 1, queued_batches: 1, ..Default::default() };
        assert!(observers.publish_stats(stats.clone()));
        assert!(!observers.publish_stats(stats));
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_prune_keeps_live_and_watched() {
        let observers = Observers::new(8);
        let (live, watched, abandoned) = (BatchId::new(), BatchId::new(), BatchId::new());
        observers.publish_batch(&batch(live));
        let _rx = observers.subscribe_batch(watched);
        drop(observers.subscribe_batch(abandoned));

        observers.prune(|id| *id == live);

        let registry = observers.registry();
        assert!(registry.contains_key(&live));
        assert!(registry.contains_key(&watched));
        assert!(!registry.contains_key(&abandoned));
    }
}
