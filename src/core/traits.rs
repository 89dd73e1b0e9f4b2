use std::collections::HashMap;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use super::errors::{CompressionError, Result};
use super::progress::ProgressSink;
use super::types::{BatchId, ItemId, Payload, RemoteReference};

/// One transfer handed to an [`UploadEndpoint`]
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub batch_id: BatchId,
    pub item_id: ItemId,
    /// Original or compressed, the endpoint cannot tell
    pub payload: Payload,
    /// Batch metadata plus per-file fields
    pub metadata: HashMap<String, String>,
    /// Cooperative flag; endpoints may use it to skip further attempts
    pub cancellation: CancellationToken,
}

/// External upload endpoint: takes bytes plus metadata, returns a reference or an error
///
/// The queue treats implementations as opaque; any transport works as long
/// as it resolves to a [`RemoteReference`] or a classified
/// [`UploadError`](super::UploadError).
#[async_trait]
pub trait UploadEndpoint: Send + Sync {
    async fn upload(&self, request: TransferRequest, progress: ProgressSink) -> Result<RemoteReference>;
}

/// Supplies the bearer credential attached to each transfer
///
/// Refresh and expiry are the supplier's concern.
#[async_trait]
pub trait TokenSupplier: Send + Sync {
    async fn bearer_token(&self) -> Result<Option<String>>;
}

/// Fixed token, e.g. read from configuration
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSupplier for StaticToken {
    async fn bearer_token(&self) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

/// Size-reducing transform applied before transfer
///
/// Must return a payload the endpoint can send unchanged. Errors are
/// non-fatal: the pipeline falls back to the original payload.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(&self, payload: Payload) -> Result<Payload, CompressionError>;
}
