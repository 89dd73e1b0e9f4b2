use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one logical upload (a batch of files for one entity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one file inside a batch, stable for the item's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-item state machine
///
/// `Queued -> (Compressing) -> Uploading -> Completed | Failed`, and any
/// non-terminal state may move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Waiting for a scheduler slot
    Queued,
    /// Running through the compression stage
    Compressing,
    /// Network transfer outstanding
    Uploading,
    /// Endpoint returned a remote reference
    Completed,
    /// Endpoint or transport failure
    Failed,
    /// Cancelled by the user or a queue reset
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Compressing | Self::Uploading)
    }

    /// Position along the forward path; `Cancelled` is handled separately
    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Compressing => 1,
            Self::Uploading => 2,
            Self::Completed | Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    /// Transitions only move forward; terminal states are never left
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            Self::Cancelled => true,
            Self::Queued => false,
            Self::Completed | Self::Failed => *self == Self::Uploading,
            _ => next.rank() > self.rank(),
        }
    }
}

/// Derived batch status, never stored independently of the items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Queued,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Pure function of the item statuses
    pub fn derive<'a>(statuses: impl IntoIterator<Item = &'a ItemStatus>) -> Self {
        let mut total = 0usize;
        let mut started = false;
        let mut active = false;
        let mut terminal = 0usize;
        let mut completed = false;
        let mut cancelled = false;

        for status in statuses {
            total += 1;
            if *status != ItemStatus::Queued {
                started = true;
            }
            if status.is_active() {
                active = true;
            }
            if status.is_terminal() {
                terminal += 1;
            }
            match status {
                ItemStatus::Completed => completed = true,
                ItemStatus::Cancelled => cancelled = true,
                _ => {}
            }
        }

        if total == 0 {
            return Self::Completed;
        }

        if active {
            return Self::Active;
        }

        if terminal < total {
            return if started { Self::Active } else { Self::Queued };
        }

        if cancelled {
            Self::Cancelled
        } else if completed {
            Self::Completed
        } else {
            Self::Failed
        }
    }
}

/// Binary payload handed to the pipeline
#[derive(Debug, Clone)]
pub struct Payload {
    pub name: String,
    pub media_type: String,
    pub data: Bytes,
}

impl Payload {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Read a local file, inferring the media type from its extension
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let media_type = media_type_for(path).to_string();

        Ok(Self::new(name, media_type, data))
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            name: self.name.clone(),
            media_type: self.media_type.clone(),
            size: self.size(),
        }
    }
}

fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// What observers see of a payload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

/// Durable reference returned by the upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteReference {
    pub url: String,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadItem {
    pub id: ItemId,
    pub file: FileInfo,
    pub status: ItemStatus,
    /// Percent, non-decreasing while uploading, 100 once completed
    pub progress: u8,
    /// Only set when `status == Failed`
    pub error: Option<String>,
    /// Non-fatal notice, e.g. compression fell back to the original payload
    pub warning: Option<String>,
    /// Only set when `status == Completed`
    pub result: Option<RemoteReference>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadItem {
    pub fn new(file: FileInfo) -> Self {
        Self {
            id: ItemId::new(),
            file,
            status: ItemStatus::Queued,
            progress: 0,
            error: None,
            warning: None,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UploadBatch {
    pub id: BatchId,
    pub entity_id: String,
    pub entity_name: String,
    pub metadata: HashMap<String, String>,
    /// Insertion order is dispatch order
    pub items: Vec<UploadItem>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadBatch {
    pub fn duration(&self) -> Option<Duration> {
        let (started, completed) = (self.started_at?, self.completed_at?);
        (completed - started).to_std().ok()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }

    /// Remote references of the items that made it
    pub fn results(&self) -> Vec<&RemoteReference> {
        self.items.iter().filter_map(|item| item.result.as_ref()).collect()
    }

    /// Mean progress over all items
    pub fn progress(&self) -> u8 {
        if self.items.is_empty() {
            return 100;
        }

        let sum: u32 = self.items.iter().map(|item| item.progress as u32).sum();
        (sum / self.items.len() as u32) as u8
    }
}

/// Queue-wide aggregate, recomputed from the registry on every transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueueStats {
    pub total_batches: usize,
    pub queued_batches: usize,
    pub active_batches: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    pub cancelled_batches: usize,

    pub total_items: usize,
    pub queued_items: usize,
    pub active_items: usize,
    /// Items that reached `Completed`
    pub uploaded_items: usize,
    pub failed_items: usize,
    pub cancelled_items: usize,

    /// Mean duration of the completed batches still held by the queue
    pub average_upload_time: Duration,
}

/// Typed cross-component broadcast
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Batch finished with at least one uploaded item
    BatchCompleted(UploadBatch),

    /// Every item of the batch failed
    BatchFailed(UploadBatch),

    /// Batch was cancelled before it finished
    BatchCancelled(UploadBatch),
}

impl QueueEvent {
    pub fn batch(&self) -> &UploadBatch {
        match self {
            Self::BatchCompleted(batch) | Self::BatchFailed(batch) | Self::BatchCancelled(batch) => batch,
        }
    }

    pub(crate) fn for_batch(batch: &UploadBatch) -> Option<Self> {
        match batch.status {
            BatchStatus::Completed => Some(Self::BatchCompleted(batch.clone())),
            BatchStatus::Failed => Some(Self::BatchFailed(batch.clone())),
            BatchStatus::Cancelled => Some(Self::BatchCancelled(batch.clone())),
            _ => None,
        }
    }
}

/// Runtime-adjustable settings, shared between handles and the manager worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_concurrency: usize,
    pub compression_enabled: bool,
}
