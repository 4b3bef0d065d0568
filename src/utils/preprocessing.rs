//! u2netp tensor preparation and mask compositing
//!
//! Both inference backends run the same model, so the image-to-tensor and
//! mask-to-alpha steps live here and the backends only move tensors in and
//! out of their runtime.

use crate::error::{DetourError, Result};
use image::{imageops, DynamicImage, GrayImage, Luma, RgbaImage};
use ndarray::{Array2, Array4};

/// Square input edge expected by u2netp
pub const U2NET_INPUT_SIZE: u32 = 320;

/// Per-channel normalisation mean (RGB)
pub const U2NET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel normalisation standard deviation (RGB)
pub const U2NET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Tensor preparation and mask compositing for u2netp
pub struct U2NetPreprocessor;

impl U2NetPreprocessor {
    /// NCHW input shape of the model
    #[must_use]
    pub fn input_shape() -> [usize; 4] {
        let side = U2NET_INPUT_SIZE as usize;
        [1, 3, side, side]
    }

    /// Resize to 320x320 RGB, scale by the brightest channel value and normalise
    ///
    /// The scale factor is the maximum channel value over the whole resized
    /// image; a black image is scaled by 1 so it does not divide by zero.
    #[must_use]
    pub fn to_tensor(image: &DynamicImage) -> Array4<f32> {
        let resized = imageops::resize(
            &image.to_rgb8(),
            U2NET_INPUT_SIZE,
            U2NET_INPUT_SIZE,
            imageops::FilterType::Lanczos3,
        );

        let max_value = resized.as_raw().iter().copied().max().unwrap_or(0).max(1);
        let scale = f32::from(max_value);

        let side = U2NET_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        #[allow(clippy::indexing_slicing)]
        // Tensor is allocated from the same edge length as the resized image
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                tensor[[0, channel, y, x]] =
                    (f32::from(pixel[channel]) / scale - U2NET_MEAN[channel]) / U2NET_STD[channel];
            }
        }

        tensor
    }

    /// First channel of the first batch entry of a model output
    ///
    /// # Errors
    /// - Output is not 4-dimensional or is empty
    /// - Data length does not match the shape
    pub fn mask_from_output(shape: &[usize], data: &[f32]) -> Result<Array2<f32>> {
        let [batch, channels, height, width] = <[usize; 4]>::try_from(shape).map_err(|_| {
            DetourError::inference(format!("Expected 4D output tensor, got {}D", shape.len()))
        })?;

        if batch == 0 || channels == 0 || height == 0 || width == 0 {
            return Err(DetourError::inference(format!(
                "Empty output tensor {:?}",
                shape
            )));
        }
        if data.len() != batch * channels * height * width {
            return Err(DetourError::inference(format!(
                "Output tensor has {} values, shape {:?} needs {}",
                data.len(),
                shape,
                batch * channels * height * width
            )));
        }

        let plane = data
            .get(..height * width)
            .ok_or_else(|| DetourError::inference("Output tensor too short"))?;
        Array2::from_shape_vec((height, width), plane.to_vec())
            .map_err(|e| DetourError::inference(format!("Failed to reshape mask: {e}")))
    }

    /// Min-max normalise a mask into an 8-bit grayscale image
    ///
    /// A constant mask has no range to stretch; it maps to its own value
    /// clamped to `[0, 1]`.
    #[must_use]
    pub fn normalize_mask(mask: &Array2<f32>) -> GrayImage {
        let (height, width) = mask.dim();
        let finite = mask.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;

        let to_byte = |value: f32| -> u8 {
            let unit = if !value.is_finite() {
                0.0
            } else if range > f32::EPSILON {
                (value - min) / range
            } else {
                value.clamp(0.0, 1.0)
            };
            (unit.clamp(0.0, 1.0) * 255.0).round() as u8
        };

        GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let value = mask
                .get((y as usize, x as usize))
                .copied()
                .unwrap_or(0.0);
            Luma([to_byte(value)])
        })
    }

    /// Resize `mask` to the source size and install it as the alpha channel
    #[must_use]
    pub fn apply_alpha(image: &DynamicImage, mask: &GrayImage) -> RgbaImage {
        let mut rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();

        let alpha = if mask.dimensions() == (width, height) {
            mask.clone()
        } else {
            imageops::resize(mask, width, height, imageops::FilterType::Triangle)
        };

        for (pixel, value) in rgba.pixels_mut().zip(alpha.pixels()) {
            pixel.0[3] = value.0[0];
        }

        rgba
    }
}
