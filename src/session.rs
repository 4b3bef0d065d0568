//! Lazily created, shared inference session
//!
//! The first caller creates the session; concurrent callers await that same
//! in-flight creation instead of starting their own. A failed creation leaves
//! the cell empty so a later caller can try again.

use crate::config::{ModelConfig, SessionOptions};
use crate::error::Result;
use crate::inference::{InferenceSession, SegmentationBackend};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Single-initialisation holder for the processor's session
pub struct SessionCell {
    backend: Arc<dyn SegmentationBackend>,
    model: ModelConfig,
    options: SessionOptions,
    cell: OnceCell<Arc<dyn InferenceSession>>,
    attempts: AtomicU64,
}

impl SessionCell {
    #[must_use]
    pub fn new(
        backend: Arc<dyn SegmentationBackend>,
        model: ModelConfig,
        options: SessionOptions,
    ) -> Self {
        Self {
            backend,
            model,
            options,
            cell: OnceCell::new(),
            attempts: AtomicU64::new(0),
        }
    }

    /// The session, creating it on first use
    ///
    /// # Errors
    /// - Whatever the backend's `create_session` fails with
    pub async fn get_or_init(&self) -> Result<Arc<dyn InferenceSession>> {
        let session = self
            .cell
            .get_or_try_init(|| async {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    backend = self.backend.name(),
                    model = %self.model.model_id,
                    threads = self.options.num_threads,
                    simd = self.options.simd,
                    attempt,
                    "Creating inference session"
                );
                let result = self.backend.create_session(&self.model, &self.options).await;
                if let Err(e) = &result {
                    tracing::warn!(backend = self.backend.name(), error = %e, "Session creation failed");
                }
                result
            })
            .await?;
        Ok(Arc::clone(session))
    }

    /// Whether a session has been created
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of times session creation was started
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}
