//! Front-end facing wrapper around [`QueueManager`]
//!
//! Adds per-upload tracking and completion logging; every queue operation
//! is still reachable through the controller.

use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{info, warn};
use crate::core::{
    BatchId,
    BatchStatus,
    BatchWatch,
    ItemStatus,
    Payload,
    QueueEvent,
    QueueManager,
    QueueStats,
    Result,
    StatsWatch,
    UploadBatch,
};

/// One submitted batch and a live view of it
pub struct TrackedUpload {
    pub batch_id: BatchId,
    watch: BatchWatch,
}

impl TrackedUpload {
    /// Latest snapshot; `None` until the queue registers the batch
    pub fn snapshot(&self) -> Option<UploadBatch> {
        self.watch.borrow().clone()
    }

    /// Underlying watch, for callers that render every intermediate state
    pub fn watch(&self) -> BatchWatch {
        self.watch.clone()
    }

    /// Resolve once the batch is completed, failed or cancelled
    ///
    /// A queue shutdown resolves to the cancelled snapshot. Returns `None`
    /// if the batch was cleared before it finished.
    pub async fn wait(mut self) -> Option<UploadBatch> {
        loop {
            {
                let current = self.watch.borrow_and_update();
                if let Some(batch) = current.as_ref() {
                    if batch.status.is_terminal() {
                        return Some(batch.clone());
                    }
                }
            }

            if self.watch.changed().await.is_err() {
                return self
                    .watch
                    .borrow()
                    .clone()
                    .filter(|batch| batch.status.is_terminal());
            }
        }
    }
}

#[derive(Clone)]
pub struct UploadController {
    queue: QueueManager,
}

impl UploadController {
    pub fn new(queue: QueueManager) -> Self {
        Self { queue }
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn start_upload(
        &self,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    ) -> TrackedUpload {
        let batch_id = self.queue.add_batch(entity_id, entity_name, files, metadata);
        let watch = self.queue.subscribe_batch(batch_id);
        TrackedUpload { batch_id, watch }
    }

    /// Start an upload and wait for it to finish
    pub async fn upload(
        &self,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    ) -> Option<UploadBatch> {
        let batch = self.start_upload(entity_id, entity_name, files, metadata).wait().await;
        if let Some(batch) = &batch {
            log_summary(batch);
        }
        batch
    }

    pub async fn cancel_upload(&self, batch_id: BatchId) -> Result<bool> {
        self.queue.cancel_upload(batch_id).await
    }

    pub async fn clear_queue(&self) -> Result<usize> {
        self.queue.clear_queue().await
    }

    pub async fn retry_failed(&self, batch_id: BatchId) -> Result<Option<TrackedUpload>> {
        Ok(self.queue.retry_failed(batch_id).await?.map(|batch_id| TrackedUpload {
            batch_id,
            watch: self.queue.subscribe_batch(batch_id),
        }))
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.get_stats()
    }

    pub fn subscribe_stats(&self) -> StatsWatch {
        self.queue.subscribe_stats()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe_events()
    }

    pub fn set_max_concurrency(&self, max_concurrency: usize) -> Result<()> {
        self.queue.set_max_concurrency(max_concurrency)
    }

    pub fn set_compression_enabled(&self, enabled: bool) {
        self.queue.set_compression_enabled(enabled)
    }
}

pub fn log_summary(batch: &UploadBatch) {
    let uploaded = batch.count(ItemStatus::Completed);
    let failed = batch.count(ItemStatus::Failed);

    match batch.status {
        BatchStatus::Completed if failed == 0 => {
            info!(entity = %batch.entity_name, uploaded, "all files uploaded");
        }
        BatchStatus::Completed => {
            warn!(entity = %batch.entity_name, uploaded, failed, "upload finished with failures");
        }
        BatchStatus::Failed => {
            warn!(entity = %batch.entity_name, failed, "upload failed");
        }
        BatchStatus::Cancelled => {
            info!(entity = %batch.entity_name, uploaded, "upload cancelled");
        }
        BatchStatus::Queued | BatchStatus::Active => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use async_trait::async_trait;
    use crate::config::QueueConfig;
    use crate::core::{ProgressSink, RemoteReference, TransferRequest, UploadEndpoint};

    struct Echo;

    #[async_trait]
    impl UploadEndpoint for Echo {
        async fn upload(&self, request: TransferRequest, progress: ProgressSink) -> Result<RemoteReference> {
            progress.update(progress.total_bytes());
            Ok(RemoteReference {
                url: format!("mem://{}", request.payload.name),
                id: None,
            })
        }
    }

    fn controller() -> UploadController {
        let (queue, _) = QueueManager::builder(Arc::new(Echo))
            .config(QueueConfig::default().with_retention(Duration::from_millis(50)))
            .without_compressor()
            .build()
            .unwrap();
        UploadController::new(queue)
    }

    #[tokio::test]
    async fn test_wait_resolves_to_final_snapshot() {
        let controller = controller();
        let files = vec![Payload::new("a.jpg", "image/jpeg", vec![1u8; 32])];

        let batch = controller.upload("f1", "Site A", files, HashMap::new()).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.items[0].result.as_ref().unwrap().url, "mem://a.jpg");
        assert_eq!(batch.items[0].progress, 100);
    }

    #[tokio::test]
    async fn test_wait_returns_none_after_clear() {
        let controller = controller();
        controller.set_max_concurrency(1).unwrap();
        let files = (0..20)
            .map(|i| Payload::new(format!("{i}.jpg"), "image/jpeg", vec![0u8; 8]))
            .collect();

        let tracked = controller.start_upload("f1", "Site A", files, HashMap::new());
        controller.clear_queue().await.unwrap();

        assert!(tracked.wait().await.is_none());
    }
}
