//! Mock segmentation backend for unit tests
//!
//! `MockBackend` implements `SegmentationBackend` without a model file or
//! runtime. Sessions can echo their input, return a fixed payload, fail in
//! several ways, emit scripted progress and wait on a gate so tests can observe
//! a run while it is in flight.

use crate::{
    config::{ModelConfig, SessionOptions},
    error::{DetourError, Result},
    inference::{InferenceSession, ProgressFn, SegmentationBackend},
    services::ImageIOService,
    types::{EncodedImage, PixelRaster, SourceImage},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// What a mock session returns
#[derive(Debug, Clone)]
pub enum MockOutput {
    /// Return the source bytes tagged as PNG
    Echo,
    /// Return this payload regardless of input
    Fixed(EncodedImage),
}

/// How a mock session fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Inference,
    Dependency,
    Decode,
}

impl MockFailure {
    fn to_error(self) -> DetourError {
        match self {
            Self::Inference => DetourError::inference("mock inference failed"),
            Self::Dependency => DetourError::dependency_unavailable("mock runtime missing"),
            Self::Decode => DetourError::decode("mock decode failed"),
        }
    }
}

#[derive(Debug)]
struct MockState {
    init_delay: Option<Duration>,
    init_failures: AtomicU32,
    init_failure: MockFailure,
    output: MockOutput,
    inference_failure: Option<MockFailure>,
    progress_script: Vec<f32>,
    gate: Option<Arc<Semaphore>>,
    started: Notify,
    sessions_created: AtomicUsize,
    inference_calls: AtomicUsize,
    call_history: Mutex<Vec<String>>,
}

/// Mock backend; clones share state and counters
#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    /// Echoing backend with progress 0.0, 0.5, 1.0
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(MockState {
                init_delay: None,
                init_failures: AtomicU32::new(0),
                init_failure: MockFailure::Inference,
                output: MockOutput::Echo,
                inference_failure: None,
                progress_script: vec![0.0, 0.5, 1.0],
                gate: None,
                started: Notify::new(),
                sessions_created: AtomicUsize::new(0),
                inference_calls: AtomicUsize::new(0),
                call_history: Mutex::new(Vec::new()),
            }),
        }
    }

    fn map_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        let mut state = Arc::try_unwrap(self.state).unwrap_or_else(|_| {
            panic!("MockBackend must be configured before it is cloned")
        });
        f(&mut state);
        Self {
            state: Arc::new(state),
        }
    }

    #[must_use]
    pub fn with_init_delay(self, delay: Duration) -> Self {
        self.map_state(|s| s.init_delay = Some(delay))
    }

    /// Fail the first `times` session creations with an inference error
    #[must_use]
    pub fn failing_init_times(self, times: u32) -> Self {
        self.map_state(|s| s.init_failures = AtomicU32::new(times))
    }

    /// Fail every session creation with `failure`
    #[must_use]
    pub fn failing_init_with(self, failure: MockFailure) -> Self {
        self.map_state(|s| {
            s.init_failures = AtomicU32::new(u32::MAX);
            s.init_failure = failure;
        })
    }

    #[must_use]
    pub fn failing_inference(self, failure: MockFailure) -> Self {
        self.map_state(|s| s.inference_failure = Some(failure))
    }

    #[must_use]
    pub fn with_output(self, output: MockOutput) -> Self {
        self.map_state(|s| s.output = output)
    }

    /// Return a fully transparent `width` x `height` PNG
    #[must_use]
    pub fn transparent_output(self, width: u32, height: u32) -> Self {
        let raster = PixelRaster::filled(width, height, [0, 0, 0, 0]);
        let encoded = ImageIOService::encode_png(&raster).unwrap();
        self.with_output(MockOutput::Fixed(encoded))
    }

    #[must_use]
    pub fn with_progress_script(self, script: Vec<f32>) -> Self {
        self.map_state(|s| s.progress_script = script)
    }

    /// Hold every inference until `release` is called once per run
    #[must_use]
    pub fn gated(self) -> Self {
        self.map_state(|s| s.gate = Some(Arc::new(Semaphore::new(0))))
    }

    /// Let one gated inference finish
    pub fn release(&self) {
        if let Some(gate) = &self.state.gate {
            gate.add_permits(1);
        }
    }

    /// Wait until an inference call has started
    pub async fn inference_started(&self) {
        self.state.started.notified().await;
    }

    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.state.sessions_created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn inference_calls(&self) -> usize {
        self.state.inference_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.state.call_history.lock().unwrap().clone()
    }

    fn record_call(&self, call: &str) {
        if let Ok(mut history) = self.state.call_history.lock() {
            history.push(call.to_string());
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentationBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_session(
        &self,
        _model: &ModelConfig,
        _options: &SessionOptions,
    ) -> Result<Arc<dyn InferenceSession>> {
        self.record_call("create_session");
        if let Some(delay) = self.state.init_delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .state
            .init_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(self.state.init_failure.to_error());
        }

        self.state.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            backend: self.clone(),
        }))
    }
}

struct MockSession {
    backend: MockBackend,
}

#[async_trait]
impl InferenceSession for MockSession {
    async fn remove_background(
        &self,
        source: &SourceImage,
        on_progress: &ProgressFn<'_>,
    ) -> Result<EncodedImage> {
        let state = &self.backend.state;
        self.backend.record_call("remove_background");
        state.inference_calls.fetch_add(1, Ordering::SeqCst);
        state.started.notify_one();

        for &p in &state.progress_script {
            on_progress(p);
            tokio::task::yield_now().await;
        }

        if let Some(gate) = &state.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| DetourError::inference(format!("gate closed: {e}")))?;
            permit.forget();
        }

        if let Some(failure) = state.inference_failure {
            return Err(failure.to_error());
        }

        Ok(match &state.output {
            MockOutput::Echo => EncodedImage::png(source.bytes().to_vec()),
            MockOutput::Fixed(image) => image.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let backend = MockBackend::new();
        let session = backend
            .create_session(&ModelConfig::default(), &SessionOptions::default())
            .await
            .unwrap();
        let source = SourceImage::new(vec![1, 2, 3], "image/png");
        let seen = Mutex::new(Vec::new());
        let result = session
            .remove_background(&source, &|p: f32| seen.lock().unwrap().push(p))
            .await
            .unwrap();

        assert_eq!(result.bytes(), &[1, 2, 3]);
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.5, 1.0]);
        assert_eq!(
            backend.call_history(),
            vec!["create_session", "remove_background"]
        );
        assert_eq!(backend.inference_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let backend = MockBackend::new().failing_init_with(MockFailure::Dependency);
        let err = backend
            .create_session(&ModelConfig::default(), &SessionOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DetourError::DependencyUnavailable(_)));
        assert_eq!(backend.sessions_created(), 0);
    }
}
