use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Class of a failed transfer, derived from the endpoint's response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    /// Connection could not be established or was dropped
    Network,
    /// The request exceeded the client timeout
    Timeout,
    /// 401 / 403
    Unauthorized,
    /// Any other 4xx, or a `success: false` body
    Validation,
    /// 5xx
    Server,
    /// The endpoint answered, but not with something we understand
    InvalidResponse,
}

impl TransferErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            408 => Self::Timeout,
            400..=499 => Self::Validation,
            500..=599 => Self::Server,
            _ => Self::InvalidResponse,
        }
    }

    /// Whether another attempt may succeed without changing the request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Unauthorized => "unauthorized",
            Self::Validation => "validation",
            Self::Server => "server",
            Self::InvalidResponse => "invalid response",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Compression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("Transfer failed ({kind}): {message}")]
    Transfer {
        kind: TransferErrorKind,
        status: Option<u16>,
        message: String,
    },

    #[error("Upload was cancelled")]
    Cancelled,

    #[error("Configuration rejected: {0}")]
    ConfigurationRejected(String),

    #[error("Queue manager shut down")]
    ManagerShutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration file: {0}")]
    Config(#[from] toml::de::Error),
}

impl UploadError {
    pub fn transfer(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self::Transfer {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transfer {
            kind: TransferErrorKind::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::ConfigurationRejected(message.into())
    }

    /// Failures worth retrying: network drops, timeouts and 5xx answers
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transfer { kind, .. } => kind.is_transient(),
            Self::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    /// Normalise a raw reqwest error into a classified transfer failure
    pub fn classify(self) -> Self {
        match self {
            Self::Http(err) => {
                let kind = if err.is_timeout() {
                    TransferErrorKind::Timeout
                } else if let Some(status) = err.status() {
                    TransferErrorKind::from_status(status.as_u16())
                } else if err.is_decode() {
                    TransferErrorKind::InvalidResponse
                } else if err.is_builder() {
                    // The request itself is malformed; resending cannot help
                    TransferErrorKind::Validation
                } else {
                    TransferErrorKind::Network
                };

                Self::Transfer {
                    kind,
                    status: err.status().map(|s| s.as_u16()),
                    message: err.to_string(),
                }
            }
            other => other,
        }
    }
}

/// Non-fatal: the pipeline falls back to the original payload
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Compression task aborted: {0}")]
    Task(String),
}

/// Error alias
pub type Result<T, E = UploadError> = std::result::Result<T, E>;
