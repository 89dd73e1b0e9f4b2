use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info};
use super::batch::BatchTracker;
use super::errors::UploadError;
use super::events::Observers;
use super::scheduler::{Scheduler, WorkItem};
use super::traits::{Compressor, UploadEndpoint};
use super::types::{
    BatchId, ItemStatus, Payload, QueueEvent, QueueSettings, QueueStats, UploadBatch,
};
use super::worker::{ReportKind, TransferWorker, WorkerReport};

/// Commands sent from [`QueueManager`](super::QueueManager) handles
pub(crate) enum ManagerCommand {
    AddBatch {
        batch_id: BatchId,
        entity_id: String,
        entity_name: String,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    },

    CancelBatch {
        batch_id: BatchId,
        reply: oneshot::Sender<bool>,
    },

    ClearQueue {
        reply: oneshot::Sender<usize>,
    },

    /// Re-add the failed items of a batch under `retry_id`
    RetryFailed {
        batch_id: BatchId,
        retry_id: BatchId,
        reply: oneshot::Sender<Option<BatchId>>,
    },

    GetBatch {
        batch_id: BatchId,
        reply: oneshot::Sender<Option<UploadBatch>>,
    },

    GetAllBatches {
        reply: oneshot::Sender<Vec<UploadBatch>>,
    },

    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Sole owner of the batch registry and the scheduler
///
/// Every handler below is synchronous: a command or worker report is
/// applied completely, observers are notified, and only then does the loop
/// go back to waiting. Nothing outside this task mutates queue state.
pub(crate) struct ManagerWorker {
    batches: HashMap<BatchId, BatchTracker>,
    /// Arrival order, for listings
    arrival: Vec<BatchId>,
    scheduler: Scheduler,
    endpoint: Arc<dyn UploadEndpoint>,
    compressor: Option<Arc<dyn Compressor>>,
    settings: watch::Receiver<QueueSettings>,
    observers: Observers,
    retention: Duration,

    report_tx: mpsc::UnboundedSender<WorkerReport>,
    report_rx: mpsc::UnboundedReceiver<WorkerReport>,
    expire_tx: mpsc::UnboundedSender<BatchId>,
    expire_rx: mpsc::UnboundedReceiver<BatchId>,
}

impl ManagerWorker {
    pub fn new(
        endpoint: Arc<dyn UploadEndpoint>,
        compressor: Option<Arc<dyn Compressor>>,
        settings: watch::Receiver<QueueSettings>,
        observers: Observers,
        retention: Duration,
    ) -> Self {
        let max_concurrency = settings.borrow().max_concurrency;
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (expire_tx, expire_rx) = mpsc::unbounded_channel();

        Self {
            batches: HashMap::new(),
            arrival: Vec::new(),
            scheduler: Scheduler::new(max_concurrency),
            endpoint,
            compressor,
            settings,
            observers,
            retention,
            report_tx,
            report_rx,
            expire_tx,
            expire_rx,
        }
    }

    pub async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ManagerCommand>) {
        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(report) = self.report_rx.recv() => {
                    self.handle_report(report);
                }
                Some(batch_id) = self.expire_rx.recv() => {
                    self.expire(batch_id);
                }
                Ok(()) = self.settings.changed() => {}
            }

            self.dispatch();
        }
    }

    /// Returns `false` once the loop should stop
    fn handle_command(&mut self, command: ManagerCommand) -> bool {
        match command {
            ManagerCommand::AddBatch { batch_id, entity_id, entity_name, files, metadata } => {
                self.add_batch(batch_id, entity_id, entity_name, files, metadata);
            }
            ManagerCommand::CancelBatch { batch_id, reply } => {
                let _ = reply.send(self.cancel_batch(batch_id));
            }
            ManagerCommand::ClearQueue { reply } => {
                let _ = reply.send(self.clear());
            }
            ManagerCommand::RetryFailed { batch_id, retry_id, reply } => {
                let _ = reply.send(self.retry_failed(batch_id, retry_id));
            }
            ManagerCommand::GetBatch { batch_id, reply } => {
                let batch = self.batches.get(&batch_id).map(|t| t.snapshot().clone());
                let _ = reply.send(batch);
            }
            ManagerCommand::GetAllBatches { reply } => {
                let batches = self
                    .arrival
                    .iter()
                    .filter_map(|id| self.batches.get(id))
                    .map(|t| t.snapshot().clone())
                    .collect();
                let _ = reply.send(batches);
            }
            ManagerCommand::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }

        true
    }

    fn add_batch(
        &mut self,
        batch_id: BatchId,
        entity_id: String,
        entity_name: String,
        files: Vec<Payload>,
        metadata: HashMap<String, String>,
    ) {
        let tracker = BatchTracker::new(batch_id, entity_id, entity_name, files, metadata);
        let total_bytes: u64 = tracker.snapshot().items.iter().map(|i| i.file.size).sum();
        info!(
            batch = %batch_id,
            entity = %tracker.snapshot().entity_name,
            files = tracker.snapshot().items.len(),
            total_bytes,
            "batch queued"
        );

        self.scheduler.enqueue(batch_id, tracker.item_ids());
        let finished = tracker.is_terminal();
        let snapshot = tracker.snapshot().clone();
        self.arrival.push(batch_id);
        self.batches.insert(batch_id, tracker);

        // Stats first: a batch observer must never see stats older than its snapshot
        self.publish_stats();
        self.observers.publish_batch(&snapshot);

        if finished {
            self.on_batch_finished(batch_id);
        }
    }

    fn cancel_batch(&mut self, batch_id: BatchId) -> bool {
        let mut cancelled = 0;
        self.update(batch_id, |tracker| {
            cancelled = tracker.cancel().len();
            cancelled > 0
        });

        let dropped = self.scheduler.remove_batch(&batch_id);
        if cancelled > 0 {
            info!(batch = %batch_id, cancelled, dropped, "batch cancelled");
        }
        cancelled > 0
    }

    fn clear(&mut self) -> usize {
        for tracker in self.batches.values_mut() {
            tracker.cancel();
        }

        let removed = self.batches.len();
        self.batches.clear();
        self.arrival.clear();
        self.scheduler.clear_pending();
        self.publish_stats();
        self.observers.clear();

        info!(removed, in_flight = self.scheduler.in_flight_len(), "queue cleared");
        removed
    }

    fn retry_failed(&mut self, batch_id: BatchId, retry_id: BatchId) -> Option<BatchId> {
        let tracker = self.batches.get(&batch_id)?;
        let payloads = tracker.failed_payloads();
        if payloads.is_empty() {
            return None;
        }

        let batch = tracker.snapshot();
        let (entity_id, entity_name, metadata) =
            (batch.entity_id.clone(), batch.entity_name.clone(), batch.metadata.clone());
        info!(batch = %batch_id, retry = %retry_id, files = payloads.len(), "retrying failed items");

        self.add_batch(retry_id, entity_id, entity_name, payloads, metadata);
        Some(retry_id)
    }

    fn handle_report(&mut self, report: WorkerReport) {
        let WorkerReport { batch_id, item_id, kind } = report;

        match kind {
            ReportKind::Compressing => {
                self.update(batch_id, |t| t.transition(&item_id, ItemStatus::Compressing));
            }
            ReportKind::CompressionFallback(reason) => {
                self.update(batch_id, |t| {
                    t.set_warning(&item_id, format!("compression skipped: {reason}"))
                });
            }
            ReportKind::Uploading => {
                self.update(batch_id, |t| t.transition(&item_id, ItemStatus::Uploading));
            }
            ReportKind::Progress(percent) => {
                self.update(batch_id, |t| t.set_progress(&item_id, percent));
            }
            ReportKind::Finished(result) => {
                self.scheduler.finish(&item_id);

                let applied = self.update(batch_id, |t| match result {
                    Ok(reference) => {
                        debug!(item = %item_id, url = %reference.url, "transfer completed");
                        t.complete(&item_id, reference)
                    }
                    Err(UploadError::Cancelled) => t.cancel_item(&item_id),
                    Err(err) => {
                        error!(batch = %batch_id, item = %item_id, error = %err, "transfer failed");
                        t.fail(&item_id, err.to_string())
                    }
                });

                if !applied {
                    debug!(batch = %batch_id, item = %item_id, "late result discarded");
                }
            }
        }
    }

    /// Apply `f` to one batch and publish the outcome if anything changed
    fn update<F>(&mut self, batch_id: BatchId, f: F) -> bool
    where
        F: FnOnce(&mut BatchTracker) -> bool,
    {
        let Some(tracker) = self.batches.get_mut(&batch_id) else {
            return false;
        };

        let was_terminal = tracker.is_terminal();
        if !f(tracker) {
            return false;
        }

        let finished = !was_terminal && tracker.is_terminal();
        self.publish_stats();
        if let Some(tracker) = self.batches.get(&batch_id) {
            self.observers.publish_batch(tracker.snapshot());
        }

        if finished {
            self.on_batch_finished(batch_id);
        }
        true
    }

    fn on_batch_finished(&mut self, batch_id: BatchId) {
        let Some(tracker) = self.batches.get(&batch_id) else {
            return;
        };

        let batch = tracker.snapshot();
        info!(
            batch = %batch_id,
            entity = %batch.entity_name,
            status = ?batch.status,
            uploaded = batch.count(ItemStatus::Completed),
            failed = batch.count(ItemStatus::Failed),
            cancelled = batch.count(ItemStatus::Cancelled),
            duration_ms = batch.duration().map(|d| d.as_millis() as u64).unwrap_or_default(),
            "batch finished"
        );

        if let Some(event) = QueueEvent::for_batch(batch) {
            self.observers.broadcast(event);
        }

        let expire_tx = self.expire_tx.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let _ = expire_tx.send(batch_id);
        });
    }

    /// Drop a finished batch once its retention window has passed
    fn expire(&mut self, batch_id: BatchId) {
        match self.batches.get(&batch_id) {
            Some(tracker) if tracker.is_terminal() => {}
            _ => return,
        }

        self.batches.remove(&batch_id);
        self.arrival.retain(|id| *id != batch_id);
        self.publish_stats();
        self.observers.remove_batch(&batch_id);

        let batches = &self.batches;
        self.observers.prune(|id| batches.contains_key(id));

        debug!(batch = %batch_id, "batch expired");
    }

    fn publish_stats(&self) {
        let stats = QueueStats::from_batches(self.batches.values().map(|t| t.snapshot()));
        self.observers.publish_stats(stats);
    }

    /// Start as many pending items as the current ceiling allows
    fn dispatch(&mut self) {
        let settings = *self.settings.borrow_and_update();
        if settings.max_concurrency != self.scheduler.max_concurrency() {
            debug!(from = self.scheduler.max_concurrency(), to = settings.max_concurrency, "concurrency ceiling changed");
            self.scheduler.set_max_concurrency(settings.max_concurrency);
        }

        while let Some(work) = self.scheduler.next() {
            match self.prepare(work, settings.compression_enabled) {
                Some(worker) => {
                    debug!(
                        batch = %work.batch_id,
                        item = %work.item_id,
                        in_flight = self.scheduler.in_flight_len(),
                        pending = self.scheduler.pending_len(),
                        "dispatching item"
                    );
                    tokio::spawn(worker.run());
                }
                None => {
                    self.scheduler.finish(&work.item_id);
                }
            }
        }
    }

    fn prepare(&self, work: WorkItem, compression_enabled: bool) -> Option<TransferWorker> {
        let tracker = self.batches.get(&work.batch_id)?;
        let item = tracker.item(&work.item_id)?;
        if item.status != ItemStatus::Queued {
            return None;
        }

        let payload = tracker.payload(&work.item_id)?;
        let batch = tracker.snapshot();
        let index = tracker.item_index(&work.item_id).unwrap_or_default() + 1;

        let mut metadata = batch.metadata.clone();
        metadata.insert("entityId".to_string(), batch.entity_id.clone());
        metadata.insert("entityName".to_string(), batch.entity_name.clone());
        metadata.insert("fileName".to_string(), payload.name.clone());
        metadata.insert("fileIndex".to_string(), index.to_string());

        let compressor = if compression_enabled {
            self.compressor.clone()
        } else {
            None
        };

        Some(TransferWorker {
            batch_id: work.batch_id,
            item_id: work.item_id,
            payload,
            metadata,
            endpoint: self.endpoint.clone(),
            compressor,
            cancellation: tracker.cancellation(),
            reports: self.report_tx.clone(),
        })
    }

    /// Cancel everything, publish the final state, then close every batch channel
    fn shutdown(&mut self) {
        let cancelled: Vec<BatchId> = self
            .arrival
            .iter()
            .copied()
            .filter(|id| {
                self.batches
                    .get_mut(id)
                    .is_some_and(|tracker| !tracker.cancel().is_empty())
            })
            .collect();
        self.scheduler.clear_pending();
        self.publish_stats();

        for batch_id in &cancelled {
            let Some(tracker) = self.batches.get(batch_id) else {
                continue;
            };
            self.observers.publish_batch(tracker.snapshot());
            if let Some(event) = QueueEvent::for_batch(tracker.snapshot()) {
                self.observers.broadcast(event);
            }
        }
        self.observers.clear();

        info!(
            batches = self.batches.len(),
            cancelled = cancelled.len(),
            idle = self.scheduler.is_idle(),
            "upload queue shutting down"
        );
    }
}
