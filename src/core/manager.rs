use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::compression::ImageCompressor;
use crate::config::{validate_concurrency, QueueConfig};
use super::errors::{Result, UploadError};
use super::events::{BatchWatch, Observers, StatsWatch};
use super::manager_worker::{ManagerCommand, ManagerWorker};
use super::traits::{Compressor, UploadEndpoint};
use super::types::{BatchId, Payload, QueueEvent, QueueSettings, QueueStats, UploadBatch};

/// Handle to the upload queue
///
/// Cheap to clone; every clone talks to the same manager worker. Dropping
/// the last clone shuts the worker down.
#[derive(Clone)]
pub struct QueueManager {
    command_tx: mpsc::UnboundedSender<ManagerCommand>,
    settings: Arc<watch::Sender<QueueSettings>>,
    observers: Observers,
}

pub struct QueueManagerBuilder {
    endpoint: Arc<dyn UploadEndpoint>,
    config: QueueConfig,
    compressor: Option<Option<Arc<dyn Compressor>>>,
}

impl QueueManagerBuilder {
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default image compressor
    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressor = Some(Some(compressor));
        self
    }

    /// Never compress, whatever the runtime toggle says
    pub fn without_compressor(mut self) -> Self {
        self.compressor = Some(None);
        self
    }

    /// Spawn the manager worker; must be called inside a tokio runtime
    pub fn build(self) -> Result<(QueueManager, JoinHandle<()>)> {
        self.config.validate()?;

        let compressor = self.compressor.unwrap_or_else(|| {
            Some(Arc::new(ImageCompressor::new(self.config.compression.clone())) as Arc<dyn Compressor>)
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (settings_tx, settings_rx) = watch::channel(self.config.settings());
        let observers = Observers::new(self.config.event_capacity);

        let worker = ManagerWorker::new(
            self.endpoint,
            compressor,
            settings_rx,
            observers.clone(),
            self.config.retention(),
        );
        let handle = tokio::spawn(worker.run(command_rx));

        info!(
            max_concurrency = self.config.max_concurrency,
            compression = self.config.compression_enabled,
            "upload queue started"
        );

        let manager = QueueManager {
            command_tx,
            settings: Arc::new(settings_tx),
            observers,
        };
        Ok((manager, handle))
    }
}

impl QueueManager {
    pub fn builder(endpoint: Arc<dyn UploadEndpoint>) -> QueueManagerBuilder {
        QueueManagerBuilder {
            endpoint,
            config: QueueConfig::default(),
            compressor: None,
        }
    }

    /// Queue a batch and return its id right away
    ///
    /// The batch is registered before any later command from this handle is
    /// processed, so subscribing or cancelling with the returned id is safe.
    pub fn add_batch(
        &self,
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    ) -> BatchId {
        let batch_id = BatchId::new();
        let command = ManagerCommand::AddBatch {
            batch_id,
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            files,
            metadata,
        };

        if self.command_tx.send(command).is_err() {
            error!(batch = %batch_id, "upload queue is shut down, batch dropped");
        }
        batch_id
    }

    /// Cancel every non-terminal item of a batch
    ///
    /// Returns `false` for unknown batches and batches with nothing left to
    /// cancel.
    pub async fn cancel_upload(&self, batch_id: BatchId) -> Result<bool> {
        self.request(|reply| ManagerCommand::CancelBatch { batch_id, reply }).await
    }

    /// Cancel and drop everything; returns how many batches were removed
    pub async fn clear_queue(&self) -> Result<usize> {
        self.request(|reply| ManagerCommand::ClearQueue { reply }).await
    }

    /// Queue the failed items of a batch again as a new batch
    pub async fn retry_failed(&self, batch_id: BatchId) -> Result<Option<BatchId>> {
        let retry_id = BatchId::new();
        self.request(|reply| ManagerCommand::RetryFailed { batch_id, retry_id, reply }).await
    }

    pub async fn batch(&self, batch_id: BatchId) -> Result<Option<UploadBatch>> {
        self.request(|reply| ManagerCommand::GetBatch { batch_id, reply }).await
    }

    /// Every registered batch, in arrival order
    pub async fn batches(&self) -> Result<Vec<UploadBatch>> {
        self.request(|reply| ManagerCommand::GetAllBatches { reply }).await
    }

    /// Last published stats
    pub fn get_stats(&self) -> QueueStats {
        self.observers.stats()
    }

    pub fn subscribe_stats(&self) -> StatsWatch {
        self.observers.subscribe_stats()
    }

    /// Watch one batch; valid before the batch exists, closes when it is dropped
    pub fn subscribe_batch(&self, batch_id: BatchId) -> BatchWatch {
        self.observers.subscribe_batch(batch_id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.observers.subscribe_events()
    }

    /// Change the ceiling; affects future dispatch only
    pub fn set_max_concurrency(&self, max_concurrency: usize) -> Result<()> {
        if let Err(err) = validate_concurrency(max_concurrency) {
            warn!(requested = max_concurrency, current = self.max_concurrency(), "concurrency change rejected");
            return Err(err);
        }

        self.settings.send_modify(|settings| settings.max_concurrency = max_concurrency);
        info!(max_concurrency, "concurrency updated");
        Ok(())
    }

    pub fn max_concurrency(&self) -> usize {
        self.settings.borrow().max_concurrency
    }

    /// Affects items not yet dispatched
    pub fn set_compression_enabled(&self, enabled: bool) {
        self.settings.send_modify(|settings| settings.compression_enabled = enabled);
        info!(enabled, "compression toggled");
    }

    pub fn compression_enabled(&self) -> bool {
        self.settings.borrow().compression_enabled
    }

    /// Cancel everything and stop the manager worker
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::Shutdown { reply }).await
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .map_err(|_| UploadError::ManagerShutdown)?;

        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }
}
