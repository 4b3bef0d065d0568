//! Segmentation adapter abstraction
//!
//! A `SegmentationBackend` creates an `InferenceSession` once; the session then
//! turns a selected image into a PNG whose alpha channel is the foreground mask.
//! `U2NetSession` implements the shared decode → tensor → model → alpha
//! pipeline on top of any `MaskModel` runtime.

use crate::{
    config::{BackendType, ModelConfig, SessionOptions},
    error::{DetourError, Result},
    models::ModelManager,
    services::ImageIOService,
    types::{EncodedImage, PixelRaster, SourceImage},
    utils::U2NetPreprocessor,
};
use async_trait::async_trait;
use instant::Instant;
use ndarray::{Array2, Array4};
use std::sync::Arc;

/// Progress callback handed to a session; receives fractions in `[0, 1]`
/// (runtimes may also send non-finite values)
pub type ProgressFn<'a> = dyn Fn(f32) + Send + Sync + 'a;

/// Progress points reported by `U2NetSession`
pub mod checkpoints {
    pub const STARTED: f32 = 0.0;
    pub const DECODED: f32 = 0.1;
    pub const PREPROCESSED: f32 = 0.2;
    pub const INFERRED: f32 = 0.9;
    pub const COMPOSITED: f32 = 1.0;
}

/// Factory for inference sessions
#[async_trait]
pub trait SegmentationBackend: Send + Sync {
    /// Short backend name for logs and status lines
    fn name(&self) -> &'static str;

    /// Create a ready-to-use session
    ///
    /// # Errors
    /// - `DependencyUnavailable` if the runtime is not available
    /// - Model resolution, download or load failures
    async fn create_session(
        &self,
        model: &ModelConfig,
        options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>>;
}

/// An initialised segmentation session
#[async_trait]
pub trait InferenceSession: Send + Sync {
    /// Remove the background of `source`, returning an encoded image with alpha
    ///
    /// # Errors
    /// - Decoding, inference or encoding failures inside the runtime
    async fn remove_background(
        &self,
        source: &SourceImage,
        on_progress: &ProgressFn<'_>,
    ) -> Result<EncodedImage>;
}

/// Blocking model runtime producing a single-channel mask
pub trait MaskModel: Send + Sync + 'static {
    /// Run the model on a `1x3x320x320` tensor and return its first mask plane
    ///
    /// # Errors
    /// - Runtime failures or unexpected output shapes
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>>;
}

/// u2netp session over any mask runtime
pub struct U2NetSession<M: MaskModel> {
    model: Arc<M>,
    label: &'static str,
}

impl<M: MaskModel> U2NetSession<M> {
    pub fn new(model: M, label: &'static str) -> Self {
        Self {
            model: Arc::new(model),
            label,
        }
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| DetourError::inference(format!("Inference worker stopped: {e}")))?
}

#[async_trait]
impl<M: MaskModel> InferenceSession for U2NetSession<M> {
    async fn remove_background(
        &self,
        source: &SourceImage,
        on_progress: &ProgressFn<'_>,
    ) -> Result<EncodedImage> {
        let start = Instant::now();
        on_progress(checkpoints::STARTED);

        let owned = source.clone();
        let image = run_blocking(move || {
            image::load_from_memory(owned.bytes())
                .map_err(|e| DetourError::decode(format!("Failed to decode input: {e}")))
        })
        .await?;
        tracing::debug!(
            backend = self.label,
            width = image.width(),
            height = image.height(),
            "Input decoded"
        );
        on_progress(checkpoints::DECODED);

        let image = Arc::new(image);
        let tensor_source = Arc::clone(&image);
        let tensor = run_blocking(move || Ok(U2NetPreprocessor::to_tensor(&tensor_source))).await?;
        on_progress(checkpoints::PREPROCESSED);

        let model = Arc::clone(&self.model);
        let inference_start = Instant::now();
        let mask = run_blocking(move || model.predict(&tensor)).await?;
        tracing::debug!(
            backend = self.label,
            inference_ms = inference_start.elapsed().as_millis() as u64,
            "Model run finished"
        );
        on_progress(checkpoints::INFERRED);

        let encoded = run_blocking(move || {
            let alpha = U2NetPreprocessor::normalize_mask(&mask);
            let rgba = U2NetPreprocessor::apply_alpha(&image, &alpha);
            ImageIOService::encode_png(&PixelRaster::from(rgba))
        })
        .await?;
        on_progress(checkpoints::COMPOSITED);

        tracing::debug!(
            backend = self.label,
            bytes = encoded.len(),
            total_ms = start.elapsed().as_millis() as u64,
            "Background removed"
        );
        Ok(encoded)
    }
}

/// Backend for a runtime that was not compiled in
pub struct UnavailableBackend {
    backend: BackendType,
}

impl UnavailableBackend {
    #[must_use]
    pub fn new(backend: BackendType) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl SegmentationBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn create_session(
        &self,
        _model: &ModelConfig,
        _options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>> {
        Err(DetourError::dependency_unavailable(format!(
            "{} backend is not compiled into this build (enable the '{}' feature)",
            self.backend, self.backend
        )))
    }
}

/// Create the backend for `backend_type`
///
/// Backends whose feature is disabled are still returned; they fail with
/// `DependencyUnavailable` when a session is requested, which the processor
/// reports like any other adapter failure.
#[must_use]
pub fn create_backend(backend_type: BackendType) -> Arc<dyn SegmentationBackend> {
    create_backend_with(backend_type, ModelManager::default())
}

/// Like [`create_backend`], loading weights through `model_manager`
#[must_use]
pub fn create_backend_with(
    backend_type: BackendType,
    model_manager: ModelManager,
) -> Arc<dyn SegmentationBackend> {
    match backend_type {
        #[cfg(feature = "tract")]
        BackendType::Tract => Arc::new(crate::backends::TractBackend::with_model_manager(
            model_manager,
        )),
        #[cfg(feature = "onnx")]
        BackendType::Onnx => Arc::new(crate::backends::OnnxBackend::with_model_manager(
            model_manager,
        )),
        #[allow(unreachable_patterns)]
        other => {
            let _ = model_manager;
            Arc::new(UnavailableBackend::new(other))
        },
    }
}
