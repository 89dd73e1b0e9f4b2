mod batch;
mod errors;
mod events;
mod manager;
mod manager_worker;
mod progress;
mod scheduler;
mod stats;
mod traits;
mod types;
mod worker;


pub use errors::{CompressionError, Result, TransferErrorKind, UploadError};
pub use events::{BatchWatch, StatsWatch};
pub use manager::{QueueManager, QueueManagerBuilder};
pub use progress::ProgressSink;
pub use traits::{Compressor, StaticToken, TokenSupplier, TransferRequest, UploadEndpoint};
pub use types::{
    BatchId,
    BatchStatus,
    FileInfo,
    ItemId,
    ItemStatus,
    Payload,
    QueueEvent,
    QueueSettings,
    QueueStats,
    RemoteReference,
    UploadBatch,
    UploadItem,
};
