//! Tract backend: pure Rust inference for u2netp
//!
//! Tract needs no native runtime, which makes it the default backend. It runs
//! single-threaded and picks SIMD kernels on its own, so the session options
//! only need to be logged.

use crate::config::{ModelConfig, SessionOptions};
use crate::error::{DetourError, Result};
use crate::inference::{InferenceSession, MaskModel, SegmentationBackend, U2NetSession};
use crate::models::ModelManager;
use crate::utils::U2NetPreprocessor;
use async_trait::async_trait;
use instant::Instant;
use ndarray::{Array2, Array4};
use std::sync::Arc;
use tract_onnx::prelude::*;

/// Type alias for the optimized runnable Tract model
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract segmentation backend
#[derive(Debug, Clone, Default)]
pub struct TractBackend {
    model_manager: ModelManager,
}

impl TractBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific model manager (e.g. with download progress enabled)
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self { model_manager }
    }

    /// Build a runnable model from ONNX bytes
    ///
    /// # Errors
    /// - The bytes are not a loadable ONNX graph for a 1x3x320x320 input
    pub fn build_model(model_data: &[u8]) -> Result<TractMaskModel> {
        let start = Instant::now();
        let input_shape = U2NetPreprocessor::input_shape();

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| DetourError::model(format!("Failed to load ONNX model: {e}")))?
            .with_input_fact(0, f32::fact(input_shape).into())
            .map_err(|e| DetourError::model(format!("Failed to set input shape: {e}")))?
            .into_optimized()
            .map_err(|e| DetourError::model(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| DetourError::model(format!("Failed to create runnable model: {e}")))?;

        log::debug!(
            "Tract model built in {}ms",
            start.elapsed().as_millis()
        );
        Ok(TractMaskModel { model })
    }
}

#[async_trait]
impl SegmentationBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    async fn create_session(
        &self,
        model: &ModelConfig,
        options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>> {
        let start = Instant::now();
        let loaded = self.model_manager.load(model).await?;

        log::info!("🚀 Initializing Tract backend");
        log::info!("🧠 Model: {}", loaded.source.display_name());
        log::debug!(
            "  - Threads: {} (Tract runs single-threaded), SIMD: {}",
            options.num_threads,
            options.simd
        );

        let mask_model = tokio::task::spawn_blocking(move || Self::build_model(&loaded.bytes))
            .await
            .map_err(|e| DetourError::model(format!("Model builder stopped: {e}")))??;

        log::info!(
            "✅ Tract backend initialized in {}ms",
            start.elapsed().as_millis()
        );
        Ok(Arc::new(U2NetSession::new(mask_model, "tract")))
    }
}

/// Runnable u2netp graph
#[derive(Debug)]
pub struct TractMaskModel {
    model: TractModel,
}

impl MaskModel for TractMaskModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>> {
        let data = input
            .as_slice()
            .ok_or_else(|| DetourError::inference("Input tensor is not contiguous"))?;
        let tensor = Tensor::from_shape(input.shape(), data)
            .map_err(|e| DetourError::inference(format!("Failed to build input tensor: {e}")))?;

        let outputs = self
            .model
            .run(tvec![tensor.into()])
            .map_err(|e| DetourError::inference(format!("Tract inference failed: {e}")))?;

        let output = outputs
            .first()
            .ok_or_else(|| DetourError::inference("No output tensor found"))?;
        let values = output
            .as_slice::<f32>()
            .map_err(|e| DetourError::inference(format!("Failed to read output tensor: {e}")))?;

        U2NetPreprocessor::mask_from_output(output.shape(), values)
    }
}
