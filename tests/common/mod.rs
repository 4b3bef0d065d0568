//! Shared fixtures for integration tests
//!
//! `BoxMaskBackend` runs the real u2netp session pipeline (decode, tensor,
//! mask normalisation, alpha compositing) with a fake model that returns a
//! rectangular mask, so no weights or native runtime are needed.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use imgralph::{
    config::{ModelConfig, SessionOptions},
    error::Result,
    inference::{InferenceSession, MaskModel, SegmentationBackend, U2NetSession},
    utils::U2NET_INPUT_SIZE,
    SourceImage,
};
use ndarray::{Array2, Array4};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mask that is 1.0 inside an inclusive rectangle of the 320x320 plane
#[derive(Debug, Clone, Copy)]
pub struct BoxMask {
    pub min_x: usize,
    pub min_y: usize,
    pub max_x: usize,
    pub max_y: usize,
}

struct FakeModel(Option<BoxMask>);

impl MaskModel for FakeModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>> {
        let side = U2NET_INPUT_SIZE as usize;
        assert_eq!(input.shape(), &[1, 3, side, side]);
        Ok(Array2::from_shape_fn(
            (side, side),
            |(y, x)| match self.0 {
                Some(b) if (b.min_x..=b.max_x).contains(&x) && (b.min_y..=b.max_y).contains(&y) => {
                    1.0
                },
                _ => 0.0,
            },
        ))
    }
}

/// Backend whose sessions segment with a fixed `BoxMask`
pub struct BoxMaskBackend {
    mask: Option<BoxMask>,
    sessions: AtomicUsize,
}

impl BoxMaskBackend {
    pub fn new(mask: Option<BoxMask>) -> Arc<Self> {
        Arc::new(Self {
            mask,
            sessions: AtomicUsize::new(0),
        })
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationBackend for BoxMaskBackend {
    fn name(&self) -> &'static str {
        "box-mask"
    }

    async fn create_session(
        &self,
        _model: &ModelConfig,
        _options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(U2NetSession::new(FakeModel(self.mask), "box-mask")))
    }
}

/// Opaque RGB test image with a gradient, encoded in `format`
pub fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut image = RgbImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let intensity = ((x + y) % 200) as u8;
        *pixel = image::Rgb([intensity, 128, 255 - intensity]);
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .unwrap();
    bytes
}

/// 320x320 PNG selection, the size at which mask and image align 1:1
pub fn model_sized_png() -> SourceImage {
    SourceImage::new(encoded_image(U2NET_INPUT_SIZE, U2NET_INPUT_SIZE, ImageFormat::Png), "image/png")
        .with_name("subject.png")
}
