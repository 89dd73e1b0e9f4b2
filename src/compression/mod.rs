//! Progressive JPEG re-encoding for photos
//!
//! An image is decoded once, then re-encoded through the configured stages
//! until it fits the target size. Anything that is not an image, or that is
//! already small enough, passes through untouched.

use std::io::Cursor;
use std::path::Path;
use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;
use crate::config::{CompressionConfig, CompressionStage};
use crate::core::{CompressionError, Compressor, Payload};

#[derive(Debug, Clone, Default)]
pub struct ImageCompressor {
    config: CompressionConfig,
}

impl ImageCompressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Compressor for ImageCompressor {
    async fn compress(&self, payload: Payload) -> Result<Payload, CompressionError> {
        if !payload.is_image() || payload.size() <= self.config.target_bytes {
            return Ok(payload);
        }

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || compress_progressive(payload, &config))
            .await
            .map_err(|err| CompressionError::Task(err.to_string()))?
    }
}

/// CPU-bound; run it off the async executor
pub fn compress_progressive(payload: Payload, config: &CompressionConfig) -> Result<Payload, CompressionError> {
    let image = image::load_from_memory(&payload.data)?;
    let original_size = payload.size();

    let mut best: Option<Vec<u8>> = None;
    for (index, stage) in config.stages.iter().enumerate() {
        let current = best.as_ref().map_or(original_size, |data| data.len() as u64);
        if current <= config.target_bytes {
            break;
        }

        match encode_stage(&image, stage) {
            Ok(encoded) => {
                debug!(
                    file = %payload.name,
                    stage = index + 1,
                    quality = stage.quality,
                    size = encoded.len(),
                    "compression stage finished"
                );
                best = Some(encoded);
            }
            // A later stage failing keeps the earlier result
            Err(err) if best.is_some() => {
                debug!(file = %payload.name, stage = index + 1, error = %err, "compression stage failed");
                break;
            }
            Err(err) => return Err(err),
        }
    }

    match best {
        Some(encoded) if (encoded.len() as u64) < original_size => Ok(Payload {
            name: jpeg_name(&payload.name),
            media_type: "image/jpeg".to_string(),
            data: Bytes::from(encoded),
        }),
        _ => Ok(payload),
    }
}

fn encode_stage(image: &DynamicImage, stage: &CompressionStage) -> Result<Vec<u8>, CompressionError> {
    let (width, height) = image.dimensions();
    let resized = if width > stage.max_dimension || height > stage.max_dimension {
        image.resize(stage.max_dimension, stage.max_dimension, FilterType::Triangle)
    } else {
        image.clone()
    };

    // JPEG has no alpha channel
    let rgb = resized.to_rgb8();
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), stage.quality);
        encoder.encode_image(&rgb)?;
    }

    Ok(buf)
}

fn jpeg_name(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    format!("{stem}.jpg")
}
