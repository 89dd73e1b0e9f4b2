pub mod adapter;
pub mod compression;
pub mod config;
pub mod core;
pub mod uploaders;
pub mod utils;

pub use adapter::{TrackedUpload, UploadController};
pub use compression::ImageCompressor;
pub use config::{CompressionConfig, EndpointConfig, QueueConfig};
pub use core::{
    BatchId,
    BatchStatus,
    ItemStatus,
    Payload,
    QueueEvent,
    QueueManager,
    QueueStats,
    RemoteReference,
    Result,
    UploadBatch,
    UploadEndpoint,
    UploadError,
};
pub use uploaders::HttpUploadEndpoint;
