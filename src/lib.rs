#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # imgralph
//!
//! Background removal with automatic crop to content.
//!
//! A selected image goes through a u2netp segmentation model, the resulting
//! transparent PNG is scanned for its alpha bounding box, and the visible
//! region (plus a small margin) is re-encoded as the published result.
//!
//! ## Features
//!
//! - **Two Backends**: Tract (pure Rust, default) and ONNX Runtime
//! - **Crop to Content**: alpha-threshold bounding box with a configurable margin
//! - **Single-Flight Processing**: one run at a time, ordered progress and status events
//! - **Model Management**: pinned weights downloaded once into a local cache
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgralph::{DetourConfig, DetourProcessor, RunOutcome, SourceImage};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let processor = DetourProcessor::new(DetourConfig::default())?;
//!
//! let source = SourceImage::from_path("portrait.jpg").await?;
//! if let RunOutcome::Completed(summary) = processor.select(source).await? {
//!     println!("finished in {}ms", summary.total_ms);
//!     let path = processor.save_download("out").await?;
//!     println!("saved {}", path.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): pure Rust inference
//! - `onnx` (default): ONNX Runtime inference
//! - `cli` (default): command-line interface, progress bar and tracing subscriber
//! - `webp-support` (default): WebP input decoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod crop;
pub mod download;
pub mod error;
pub mod handles;
pub mod inference;
pub mod models;
pub mod processor;
pub mod services;
pub mod session;
pub mod tracing_config;
pub mod types;
pub mod utils;

use tokio::io::{AsyncRead, AsyncReadExt};

#[cfg(feature = "onnx")]
pub use backends::OnnxBackend;
#[cfg(feature = "tract")]
pub use backends::TractBackend;
pub use cache::{format_size, ModelCache};
pub use config::{BackendType, DetourConfig, DetourConfigBuilder, ModelConfig, SessionOptions};
pub use crop::{content_bounds, crop, crop_payload, extract_region, BoundingBox, CropOptions, CropOutcome};
pub use download::ModelDownloader;
pub use error::{DetourError, Result};
pub use handles::{HandleRegistry, ResultHandle};
pub use inference::{create_backend, InferenceSession, SegmentationBackend};
pub use models::{ModelManager, ModelSource};
pub use processor::{DetourProcessor, Download, ProcessorSnapshot, RunOutcome, RunPhase};
pub use services::{
    ChannelProgressReporter, ConsoleProgressReporter, ImageIOService, MimeDetector,
    NoOpProgressReporter, PipelineEvent, ProcessingStage, ProgressReporter, ProgressUpdate,
    ProgressValue, StatusMessage,
};
pub use types::{EncodedImage, FinishKind, PixelRaster, RunSummary, SourceImage};

#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{TracingConfig, TracingFormat};

/// Remove the background of an in-memory image and crop it to content
///
/// Runs a one-off processor. Callers handling many images should keep a
/// [`DetourProcessor`] instead so the session is created only once.
///
/// # Examples
/// ```rust,no_run
/// use imgralph::{remove_background_from_bytes, DetourConfig};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let download = remove_background_from_bytes(&upload, "image/jpeg", &DetourConfig::default()).await?;
/// std::fs::write(&download.file_name, download.image.bytes())?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
/// - `Validation` when `mime_type` is not an image type
/// - Any fatal pipeline error
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    mime_type: &str,
    config: &DetourConfig,
) -> Result<Download> {
    let processor = DetourProcessor::new(config.clone())?;
    let source = SourceImage::new(image_bytes.to_vec(), mime_type);
    match processor.select(source).await? {
        RunOutcome::Completed(_) => processor
            .download()
            .ok_or_else(|| DetourError::inference("run completed without a result")),
        RunOutcome::Ignored => Err(DetourError::inference("processor was busy")),
    }
}

/// Like [`remove_background_from_bytes`], reading the image from `reader`
///
/// The MIME type is sniffed from the payload's signature.
///
/// # Errors
/// - Reading from `reader` fails
/// - The payload is not a recognised image (`Validation`)
/// - Any fatal pipeline error
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    mut reader: R,
    config: &DetourConfig,
) -> Result<Download> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    let mime_type = MimeDetector::sniff(&bytes).unwrap_or(services::format::OCTET_STREAM);
    remove_background_from_bytes(&bytes, mime_type, config).await
}
