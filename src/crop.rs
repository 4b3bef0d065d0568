//! Crop-to-content: alpha bounding box with margin
//!
//! After background removal most of the canvas is transparent. This module
//! finds the smallest rectangle holding every pixel whose alpha is strictly
//! above a threshold, grows it by a small margin (clamped to the raster) and
//! re-encodes that region as PNG.

use crate::{
    error::Result,
    services::ImageIOService,
    types::{EncodedImage, PixelRaster},
};
use serde::{Deserialize, Serialize};

/// Pixels with alpha at or below this value count as background
pub const DEFAULT_ALPHA_THRESHOLD: u8 = 8;

/// Pixels of transparent border kept around the content
pub const DEFAULT_MARGIN: u32 = 1;

/// Inclusive pixel rectangle in raster coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    #[must_use]
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    /// Grow by `margin` on every side without leaving a `width` x `height` raster
    #[must_use]
    pub fn expand(self, margin: u32, width: u32, height: u32) -> Self {
        Self {
            min_x: self.min_x.saturating_sub(margin),
            min_y: self.min_y.saturating_sub(margin),
            max_x: self
                .max_x
                .saturating_add(margin)
                .min(width.saturating_sub(1)),
            max_y: self
                .max_y
                .saturating_add(margin)
                .min(height.saturating_sub(1)),
        }
    }

    #[must_use]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }

    /// Whether the box spans the whole `width` x `height` raster
    #[must_use]
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.min_x == 0
            && self.min_y == 0
            && self.max_x + 1 == width
            && self.max_y + 1 == height
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {})..=({}, {}) [{}x{}]",
            self.min_x,
            self.min_y,
            self.max_x,
            self.max_y,
            self.width(),
            self.height()
        )
    }
}

/// Cropper parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropOptions {
    /// Alpha must be strictly greater than this to count as content
    pub alpha_threshold: u8,
    /// Border added around the content box, clamped to the raster
    pub margin: u32,
}

impl Default for CropOptions {
    fn default() -> Self {
        Self {
            alpha_threshold: DEFAULT_ALPHA_THRESHOLD,
            margin: DEFAULT_MARGIN,
        }
    }
}

/// Result of a crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CropOutcome {
    /// Content was found; `image` is the re-encoded region
    Cropped {
        /// Region extracted, margin included
        bounds: BoundingBox,
        /// Dimensions of the raster that was scanned
        source_size: (u32, u32),
        image: EncodedImage,
    },
    /// No pixel exceeded the threshold: the image is entirely transparent
    Empty,
}

impl CropOutcome {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    #[must_use]
    pub fn bounds(&self) -> Option<BoundingBox> {
        match self {
            Self::Cropped { bounds, .. } => Some(*bounds),
            Self::Empty => None,
        }
    }
}

/// Tight box around pixels with alpha strictly above `alpha_threshold`
///
/// Returns `None` when no pixel qualifies (including zero-sized rasters).
#[must_use]
pub fn content_bounds(raster: &PixelRaster, alpha_threshold: u8) -> Option<BoundingBox> {
    let width = raster.width() as usize;
    if width == 0 || raster.height() == 0 {
        return None;
    }

    // Running bounds start inverted so an all-transparent scan stays empty.
    let mut min_x = width;
    let mut min_y = raster.height() as usize;
    let mut max_x: Option<usize> = None;
    let mut max_y: Option<usize> = None;

    for (y, row) in raster.data().chunks_exact(width * 4).enumerate() {
        for (x, pixel) in row.chunks_exact(4).enumerate() {
            let alpha = pixel.get(3).copied().unwrap_or(0);
            if alpha > alpha_threshold {
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = Some(max_x.map_or(x, |m| m.max(x)));
                max_y = Some(max_y.map_or(y, |m| m.max(y)));
            }
        }
    }

    let (max_x, max_y) = (max_x?, max_y?);
    Some(BoundingBox {
        min_x: min_x as u32,
        min_y: min_y as u32,
        max_x: max_x as u32,
        max_y: max_y as u32,
    })
}

/// Copy the region covered by `bounds` into a new raster
///
/// # Errors
/// - `bounds` is inverted or reaches outside the raster
pub fn extract_region(raster: &PixelRaster, bounds: BoundingBox) -> Result<PixelRaster> {
    if bounds.min_x > bounds.max_x || bounds.min_y > bounds.max_y {
        return Err(crate::error::DetourError::encode(format!(
            "region {bounds} is inverted"
        )));
    }
    if bounds.max_x >= raster.width() || bounds.max_y >= raster.height() {
        return Err(crate::error::DetourError::encode(format!(
            "region {} exceeds {}x{} raster",
            bounds,
            raster.width(),
            raster.height()
        )));
    }

    let stride = raster.width() as usize * 4;
    let row_start = bounds.min_x as usize * 4;
    let row_len = bounds.width() as usize * 4;
    let mut data = Vec::with_capacity(row_len * bounds.height() as usize);

    for y in bounds.min_y..=bounds.max_y {
        let start = y as usize * stride + row_start;
        if let Some(row) = raster.data().get(start..start + row_len) {
            data.extend_from_slice(row);
        }
    }

    PixelRaster::from_rgba(bounds.width(), bounds.height(), data)
}

/// Scan, expand, extract and re-encode
///
/// # Errors
/// - `EncodeFailure` when the cropped region cannot be exported
pub fn crop(raster: &PixelRaster, options: CropOptions) -> Result<CropOutcome> {
    let Some(tight) = content_bounds(raster, options.alpha_threshold) else {
        tracing::debug!(
            width = raster.width(),
            height = raster.height(),
            threshold = options.alpha_threshold,
            "No content above alpha threshold"
        );
        return Ok(CropOutcome::Empty);
    };

    let bounds = tight.expand(options.margin, raster.width(), raster.height());
    tracing::debug!(%tight, %bounds, "Content bounds found");

    let region = extract_region(raster, bounds)?;
    let image = ImageIOService::encode_png(&region)?;

    Ok(CropOutcome::Cropped {
        bounds,
        source_size: (raster.width(), raster.height()),
        image,
    })
}

/// Decode an encoded payload, then crop it
///
/// # Errors
/// - `DecodeFailure` when the payload is not an image
/// - `EncodeFailure` when the cropped region cannot be exported
pub fn crop_payload(payload: &[u8], options: CropOptions) -> Result<CropOutcome> {
    let raster = ImageIOService::decode_raster(payload)?;
    crop(&raster, options)
}
