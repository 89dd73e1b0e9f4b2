use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use super::errors::{Result, UploadError};
use super::progress::ProgressSink;
use super::traits::{Compressor, TransferRequest, UploadEndpoint};
use super::types::{BatchId, ItemId, Payload, RemoteReference};

/// Message from a transfer worker back to the manager worker
#[derive(Debug)]
pub(crate) struct WorkerReport {
    pub batch_id: BatchId,
    pub item_id: ItemId,
    pub kind: ReportKind,
}

#[derive(Debug)]
pub(crate) enum ReportKind {
    Compressing,
    /// Compression failed, the original payload is sent instead
    CompressionFallback(String),
    Uploading,
    Progress(u8),
    Finished(Result<RemoteReference>),
}

/// Runs one item: optional compression, then exactly one endpoint call
///
/// Never touches queue state; everything goes back through `reports`.
pub(crate) struct TransferWorker {
    pub batch_id: BatchId,
    pub item_id: ItemId,
    pub payload: Payload,
    pub metadata: HashMap<String, String>,
    pub endpoint: Arc<dyn UploadEndpoint>,
    pub compressor: Option<Arc<dyn Compressor>>,
    pub cancellation: CancellationToken,
    pub reports: mpsc::UnboundedSender<WorkerReport>,
}

impl TransferWorker {
    fn report(&self, kind: ReportKind) {
        let _ = self.reports.send(WorkerReport {
            batch_id: self.batch_id,
            item_id: self.item_id,
            kind,
        });
    }

    pub async fn run(self) {
        let result = self.execute().await;
        self.report(ReportKind::Finished(result));
    }

    async fn execute(&self) -> Result<RemoteReference> {
        if self.cancellation.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let payload = match &self.compressor {
            Some(compressor) => self.compress(compressor.as_ref()).await,
            None => self.payload.clone(),
        };

        // Last checkpoint before network I/O
        if self.cancellation.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.report(ReportKind::Uploading);
        debug!(item = %self.item_id, file = %payload.name, size = payload.size(), "transfer started");

        let progress = {
            let reports = self.reports.clone();
            let (batch_id, item_id) = (self.batch_id, self.item_id);
            ProgressSink::new(payload.size(), move |percent| {
                let _ = reports.send(WorkerReport {
                    batch_id,
                    item_id,
                    kind: ReportKind::Progress(percent),
                });
            })
        };

        let request = TransferRequest {
            batch_id: self.batch_id,
            item_id: self.item_id,
            payload,
            metadata: self.metadata.clone(),
            cancellation: self.cancellation.clone(),
        };

        self.endpoint.upload(request, progress).await
    }

    async fn compress(&self, compressor: &dyn Compressor) -> Payload {
        self.report(ReportKind::Compressing);

        let original_size = self.payload.size();
        match compressor.compress(self.payload.clone()).await {
            Ok(compressed) => {
                debug!(
                    item = %self.item_id,
                    original_size,
                    compressed_size = compressed.size(),
                    "compression finished"
                );
                compressed
            }
            Err(err) => {
                warn!(item = %self.item_id, file = %self.payload.name, error = %err, "compression failed, sending original");
                self.report(ReportKind::CompressionFallback(err.to_string()));
                self.payload.clone()
            }
        }
    }
}
