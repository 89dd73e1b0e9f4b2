use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::core::{QueueSettings, Result, UploadError};

/// Lowest accepted concurrency ceiling
pub const MIN_CONCURRENCY: usize = 1;
/// Highest accepted concurrency ceiling
pub const MAX_CONCURRENCY: usize = 8;

/// Queue configuration, usually loaded from a TOML file
///
/// ```toml
/// max_concurrency = 2
/// compression_enabled = true
/// retention_ms = 30000
///
/// [endpoint]
/// url = "https://example.com/api/upload"
/// timeout_secs = 300
///
/// [compression]
/// target_bytes = 2097152
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum simultaneous transfers, `1..=8`
    pub max_concurrency: usize,
    /// Run the compression stage before transfer
    pub compression_enabled: bool,
    /// How long a finished batch stays observable before it is dropped
    pub retention_ms: u64,
    /// Buffer of the cross-component broadcast
    pub event_capacity: usize,
    pub endpoint: EndpointConfig,
    pub compression: CompressionConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            compression_enabled: true,
            retention_ms: 30_000,
            event_capacity: 256,
            endpoint: EndpointConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl QueueConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: QueueConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        validate_concurrency(self.max_concurrency)?;

        if self.compression.stages.is_empty() {
            return Err(UploadError::rejected("compression needs at least one stage"));
        }
        if let Some(stage) = self.compression.stages.iter().find(|s| s.quality == 0 || s.quality > 100) {
            return Err(UploadError::rejected(format!(
                "compression quality {} is outside 1..=100",
                stage.quality
            )));
        }
        if self.endpoint.max_attempts == 0 {
            return Err(UploadError::rejected("endpoint.max_attempts must be at least 1"));
        }

        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn settings(&self) -> QueueSettings {
        QueueSettings {
            max_concurrency: self.max_concurrency,
            compression_enabled: self.compression_enabled,
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression_enabled = enabled;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention_ms = retention.as_millis() as u64;
        self
    }
}

pub fn validate_concurrency(max_concurrency: usize) -> Result<usize> {
    if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrency) {
        Ok(max_concurrency)
    } else {
        Err(UploadError::rejected(format!(
            "concurrency {max_concurrency} is outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}"
        )))
    }
}

/// HTTP upload endpoint settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub url: String,
    /// Per-attempt request timeout
    pub timeout_secs: u64,
    /// Attempts per transfer, including the first one
    pub max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Size of the body chunks, which is also the progress granularity
    pub chunk_size: usize,
    /// Static bearer token; leave unset to supply one programmatically
    pub token: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/upload".to_string(),
            timeout_secs: 300,
            max_attempts: 3,
            retry_initial_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            chunk_size: 64 * 1024,
            token: None,
        }
    }
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One pass of the progressive compressor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompressionStage {
    /// JPEG quality, `1..=100`
    pub quality: u8,
    /// Longest edge after resizing
    pub max_dimension: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Stop once the payload is at or below this size
    pub target_bytes: u64,
    pub stages: Vec<CompressionStage>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            target_bytes: 2 * 1024 * 1024,
            stages: vec![
                CompressionStage { quality: 75, max_dimension: 1920 },
                CompressionStage { quality: 60, max_dimension: 1920 },
                CompressionStage { quality: 50, max_dimension: 1600 },
            ],
        }
    }
}
