//! ONNX Runtime backend for u2netp
//!
//! Sessions run on the CPU execution provider with one intra-op and one
//! inter-op thread, which keeps the runtime usable in environments without
//! shared-memory threading.

use crate::config::{ModelConfig, SessionOptions};
use crate::error::{DetourError, Result};
use crate::inference::{InferenceSession, MaskModel, SegmentationBackend, U2NetSession};
use crate::models::ModelManager;
use crate::utils::U2NetPreprocessor;
use async_trait::async_trait;
use instant::Instant;
use ndarray::{Array2, Array4};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::sync::{Arc, Mutex, PoisonError};

/// ONNX Runtime segmentation backend
#[derive(Debug, Clone, Default)]
pub struct OnnxBackend {
    model_manager: ModelManager,
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific model manager (e.g. with download progress enabled)
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self { model_manager }
    }

    /// Create an ONNX Runtime session from model bytes
    ///
    /// # Errors
    /// - ONNX Runtime cannot be loaded (`DependencyUnavailable`)
    /// - The bytes are not a valid model
    pub fn build_model(model_data: &[u8], options: &SessionOptions) -> Result<OnnxMaskModel> {
        let start = Instant::now();
        let threads = options.num_threads.max(1);

        let builder = Session::builder().map_err(|e| {
            DetourError::dependency_unavailable(format!("ONNX Runtime is not available: {e}"))
        })?;

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetourError::inference(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(threads)
            .map_err(|e| DetourError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(threads)
            .map_err(|e| DetourError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model_data)
            .map_err(|e| DetourError::model(format!("Failed to create session from model data: {e}")))?;

        log::debug!("✅ ONNX Runtime session created");
        log::debug!("  - Threading: {threads} intra-op, {threads} inter-op");
        log::debug!("  - SIMD: {}", options.simd);
        log::debug!("  - Build time: {}ms", start.elapsed().as_millis());

        Ok(OnnxMaskModel {
            session: Mutex::new(session),
        })
    }
}

#[async_trait]
impl SegmentationBackend for OnnxBackend {
    fn name(&self) -> &'static str {
        "onnx"
    }

    async fn create_session(
        &self,
        model: &ModelConfig,
        options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>> {
        let start = Instant::now();
        let loaded = self.model_manager.load(model).await?;
        log::info!("🚀 Initializing ONNX Runtime backend");
        log::info!("🧠 Model: {}", loaded.source.display_name());

        let options = options.clone();
        let mask_model =
            tokio::task::spawn_blocking(move || Self::build_model(&loaded.bytes, &options))
                .await
                .map_err(|e| DetourError::model(format!("Session builder stopped: {e}")))??;

        log::info!(
            "📊 ONNX Runtime backend initialized in {}ms",
            start.elapsed().as_millis()
        );
        Ok(Arc::new(U2NetSession::new(mask_model, "onnx")))
    }
}

/// ONNX Runtime session running u2netp
///
/// `Session::run` needs exclusive access; the processor runs one inference at
/// a time, so the lock is never contended.
#[derive(Debug)]
pub struct OnnxMaskModel {
    session: Mutex<Session>,
}

impl MaskModel for OnnxMaskModel {
    fn predict(&self, input: &Array4<f32>) -> Result<Array2<f32>> {
        let inference_start = Instant::now();
        let input_value = Value::from_array(input.clone())
            .map_err(|e| DetourError::inference(format!("Failed to convert input tensor: {e}")))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| DetourError::inference(format!("ONNX inference failed: {e}")))?;

        // Positional access: u2netp's first output is the fused mask
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| DetourError::inference("No output tensors found"))?;
        let output = outputs
            .get(first_key)
            .ok_or_else(|| DetourError::inference("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| DetourError::inference(format!("Failed to extract output tensor: {e}")))?;

        let shape = output.shape().to_vec();
        let values: Vec<f32> = output.iter().copied().collect();
        log::debug!(
            "ONNX inference finished in {}ms, output {:?}",
            inference_start.elapsed().as_millis(),
            shape
        );

        U2NetPreprocessor::mask_from_output(&shape, &values)
    }
}
