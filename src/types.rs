//! Core data types shared across the pipeline

use crate::crop::BoundingBox;
use crate::error::{DetourError, Result};
use crate::services::format::MimeDetector;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// MIME type of every payload the cropper produces
pub const PNG_MIME: &str = "image/png";

/// An image selected by the user: immutable bytes plus their declared MIME type
#[derive(Debug, Clone)]
pub struct SourceImage {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: Option<String>,
}

impl SourceImage {
    /// Wrap raw bytes with a declared content type
    pub fn new<B: Into<Vec<u8>>, M: Into<String>>(bytes: B, mime_type: M) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            mime_type: mime_type.into(),
            name: None,
        }
    }

    /// Attach a display name (usually the original file name)
    #[must_use]
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Read a file and declare its MIME type from the extension
    ///
    /// Files with an unknown extension are declared `application/octet-stream`,
    /// which the processor rejects as not being an image.
    ///
    /// # Errors
    /// - File cannot be read
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DetourError::file_io_error("read input file", path, &e))?;
        let mime_type = MimeDetector::from_path(path);
        let mut source = Self::new(bytes, mime_type);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            source = source.with_name(name);
        }
        Ok(source)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the declared content type is an image type
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// An encoded image payload (inference output or cropped result)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Arc<[u8]>,
    mime_type: String,
}

impl EncodedImage {
    pub fn new<B: Into<Vec<u8>>, M: Into<String>>(bytes: B, mime_type: M) -> Self {
        Self {
            bytes: Arc::from(bytes.into()),
            mime_type: mime_type.into(),
        }
    }

    /// Wrap PNG bytes
    pub fn png<B: Into<Vec<u8>>>(bytes: B) -> Self {
        Self::new(bytes, PNG_MIME)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded pixel grid, row-major RGBA8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelRaster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelRaster {
    /// Build a raster from an RGBA8 buffer
    ///
    /// # Errors
    /// - Buffer length does not equal `width * height * 4`
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(DetourError::decode(format!(
                "RGBA buffer has {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A raster filled with a single RGBA colour
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 4)
    }

    /// RGBA value at `(x, y)`, `None` outside the raster
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        let offset = self.offset(x, y)?;
        self.data.get(offset..offset + 4)?.try_into().ok()
    }

    /// Overwrite the pixel at `(x, y)`; out-of-range writes are ignored
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if let Some(offset) = self.offset(x, y) {
            if let Some(px) = self.data.get_mut(offset..offset + 4) {
                px.copy_from_slice(&rgba);
            }
        }
    }

    /// Alpha channel value at `(x, y)`
    #[must_use]
    pub fn alpha(&self, x: u32, y: u32) -> Option<u8> {
        self.offset(x, y)
            .and_then(|offset| self.data.get(offset + 3).copied())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<image::RgbaImage> for PixelRaster {
    fn from(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}

impl TryFrom<PixelRaster> for image::RgbaImage {
    type Error = DetourError;

    fn try_from(raster: PixelRaster) -> Result<Self> {
        let (width, height) = (raster.width, raster.height);
        image::RgbaImage::from_raw(width, height, raster.data)
            .ok_or_else(|| DetourError::encode(format!("invalid {}x{} RGBA buffer", width, height)))
    }
}

/// How a finished run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FinishKind {
    /// Result cropped to `bounds` (margin included) of a `source_width` x `source_height` image
    Cropped {
        bounds: BoundingBox,
        source_width: u32,
        source_height: u32,
    },
    /// Nothing opaque was found; the uncropped inference output was kept
    Transparent,
}

/// Timings and outcome of a finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub kind: FinishKind,
    /// Size of the published PNG payload
    pub result_bytes: usize,
    pub session_ms: u64,
    pub inference_ms: u64,
    pub crop_ms: u64,
    pub total_ms: u64,
    pub finished_at: DateTime<Utc>,
}
