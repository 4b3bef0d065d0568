//! Detourage processor: the select → segment → crop → publish state machine
//!
//! `DetourProcessor` owns the lazily created inference session, the state of
//! the current run, its progress indicator and the published result. At most
//! one run is active at a time; a selection made while a run is in flight is
//! dropped and reported as [`RunOutcome::Ignored`].
//!
//! Every transition of a run goes through the [`RunGuard`] handed out by the
//! single-flight check. If a run's future is dropped before it finishes, the
//! guard moves the machine to `Failed` and releases the run's result.

use crate::{
    config::DetourConfig,
    crop::{content_bounds, extract_region, BoundingBox},
    error::{DetourError, Result},
    handles::{replace_result, HandleRegistry, ResultHandle},
    inference::{create_backend, SegmentationBackend},
    services::{
        map_inference_progress,
        progress::{
            COMPLETE_PERCENT, CROP_DECODE_PERCENT, CROP_FINALIZE_PERCENT,
            INFERENCE_DONE_PERCENT, SESSION_READY_PERCENT,
        },
        ImageIOService, ProcessingStage, ProgressReporter, ProgressSnapshot, ProgressTracker,
        StatusMessage,
    },
    session::SessionCell,
    types::{EncodedImage, FinishKind, PixelRaster, RunSummary, SourceImage},
};
use chrono::Utc;
use instant::Instant;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::Instrument;

const STATUS_LOADED: &str = "Image loaded. Starting background removal...";
const STATUS_PROCESSING: &str = "Processing...";
const STATUS_INVALID: &str = "Invalid file. Please choose an image.";
const STATUS_TRANSPARENT: &str = "Image is entirely transparent.";
const STATUS_DONE: &str = "Done!";

/// Phase of the processing state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    SessionInit,
    Inferring,
    Cropping,
    Done,
    Failed,
}

impl RunPhase {
    /// Whether a run is in flight
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::SessionInit | Self::Inferring | Self::Cropping)
    }

    /// Whether the phase ends a run
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::SessionInit => "session-init",
            Self::Inferring => "inferring",
            Self::Cropping => "cropping",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a selection
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The run reached `Done`
    Completed(RunSummary),
    /// Another run was in flight; the selection was dropped
    Ignored,
}

impl RunOutcome {
    #[must_use]
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }

    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Completed(summary) => Some(summary),
            Self::Ignored => None,
        }
    }
}

/// The finished result offered for download
#[derive(Debug, Clone)]
pub struct Download {
    pub file_name: String,
    pub url: String,
    pub image: EncodedImage,
}

/// Point-in-time view of the processor for front ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorSnapshot {
    pub phase: RunPhase,
    pub run_id: u64,
    pub progress: ProgressSnapshot,
    pub status: Option<StatusMessage>,
    pub source_name: Option<String>,
    /// Handle URL of the published result; only set in `Done`
    pub result_url: Option<String>,
}

impl ProcessorSnapshot {
    #[must_use]
    pub fn result_ready(&self) -> bool {
        self.result_url.is_some()
    }
}

struct RunContext {
    phase: RunPhase,
    run_id: u64,
    source: Option<SourceImage>,
    tracker: ProgressTracker,
    result: Option<ResultHandle>,
    status: Option<StatusMessage>,
}

impl RunContext {
    fn set_status(&mut self, status: StatusMessage) {
        self.tracker.report_status(status.clone());
        self.status = Some(status);
    }
}

fn lock(state: &Mutex<RunContext>) -> MutexGuard<'_, RunContext> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that the caller owns the active run
///
/// Only obtainable from the single-flight check in [`DetourProcessor::select`].
pub struct RunGuard<'a> {
    state: &'a Mutex<RunContext>,
    run_id: u64,
    finished: bool,
}

impl RunGuard<'_> {
    #[must_use]
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    fn with<R>(&self, f: impl FnOnce(&mut RunContext) -> R) -> R {
        f(&mut lock(self.state))
    }

    fn session_ready(&self) {
        self.with(|ctx| {
            ctx.phase = RunPhase::Inferring;
            ctx.tracker.set_percent(
                ProcessingStage::Inference,
                SESSION_READY_PERCENT,
                "Model ready, removing background...",
            );
        });
    }

    fn inference_progress(&self, fraction: f32) {
        self.with(|ctx| {
            if ctx.phase != RunPhase::Inferring {
                return;
            }
            match map_inference_progress(fraction) {
                Some(percent) => {
                    ctx.tracker
                        .set_percent(ProcessingStage::Inference, percent, "Removing background...");
                },
                None => ctx
                    .tracker
                    .set_indeterminate(ProcessingStage::Inference, "Removing background..."),
            }
        });
    }

    /// Install the raw inference output; it stays hidden until `Done`
    fn inference_done(&self, raw: ResultHandle) {
        self.with(|ctx| {
            replace_result(&mut ctx.result, Some(raw));
            ctx.phase = RunPhase::Cropping;
            ctx.tracker.set_percent(
                ProcessingStage::Cropping,
                INFERENCE_DONE_PERCENT,
                "Background removed, cropping...",
            );
        });
    }

    fn crop_progress(&self, percent: u8, description: &str) {
        self.with(|ctx| {
            ctx.tracker
                .set_percent(ProcessingStage::Cropping, percent, description);
        });
    }

    /// Enter `Done`; `cropped` replaces the raw output when present
    fn finish(mut self, cropped: Option<ResultHandle>, summary: &RunSummary) {
        self.finished = true;
        self.with(|ctx| {
            let status = if let Some(handle) = cropped {
                replace_result(&mut ctx.result, Some(handle));
                STATUS_DONE
            } else {
                STATUS_TRANSPARENT
            };
            ctx.phase = RunPhase::Done;
            ctx.set_status(StatusMessage::info(status));
            ctx.tracker
                .set_percent(ProcessingStage::Completed, COMPLETE_PERCENT, "Done");
            ctx.tracker.report_completion(summary);
        });
    }

    /// Enter `Failed`, release the run's result and report `error`
    fn fail(mut self, error: DetourError) -> DetourError {
        self.finished = true;
        self.abort(&error.to_string());
        error
    }

    fn abort(&self, message: &str) {
        self.with(|ctx| {
            replace_result(&mut ctx.result, None);
            ctx.phase = RunPhase::Failed;
            ctx.tracker.report_error(message);
            ctx.tracker.hide();
            ctx.set_status(StatusMessage::error(format!("Error: {message}")));
        });
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(run_id = self.run_id, "Run dropped before completion");
            self.abort("processing was interrupted");
        }
    }
}

/// Orchestrates session setup, inference, cropping and result publication
pub struct DetourProcessor {
    config: DetourConfig,
    sessions: SessionCell,
    registry: Arc<HandleRegistry>,
    state: Mutex<RunContext>,
}

impl DetourProcessor {
    /// Create a processor using the backend named in `config`
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: DetourConfig) -> Result<Self> {
        let backend = create_backend(config.backend);
        Self::with_backend(config, backend)
    }

    /// Create a processor with an explicit segmentation backend
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_backend(
        config: DetourConfig,
        backend: Arc<dyn SegmentationBackend>,
    ) -> Result<Self> {
        config.validate()?;
        let sessions = SessionCell::new(backend, config.model.clone(), config.session.clone());
        Ok(Self {
            config,
            sessions,
            registry: HandleRegistry::new(),
            state: Mutex::new(RunContext {
                phase: RunPhase::Idle,
                run_id: 0,
                source: None,
                tracker: ProgressTracker::no_op(),
                result: None,
                status: None,
            }),
        })
    }

    /// Send progress and status events to `reporter`
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        let ctx = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        ctx.tracker = ProgressTracker::new(reporter);
        self
    }

    /// Handle a file selection
    ///
    /// Runs the whole pipeline for `source` unless another run is in flight,
    /// in which case the selection is dropped.
    ///
    /// # Errors
    /// - `Validation` when `source` is not an image (no state change)
    /// - Any fatal pipeline error; the processor is then in `Failed`
    pub async fn select(&self, source: SourceImage) -> Result<RunOutcome> {
        let Some(guard) = self.begin_run(&source)? else {
            return Ok(RunOutcome::Ignored);
        };

        let span = tracing::info_span!(
            "detour_run",
            run_id = guard.run_id(),
            source = source.name().unwrap_or("<bytes>"),
            backend = self.sessions.backend_name()
        );
        self.run(guard, source).instrument(span).await
    }

    /// Single-flight check; installs the new run on success
    fn begin_run(&self, source: &SourceImage) -> Result<Option<RunGuard<'_>>> {
        let mut ctx = lock(&self.state);

        if !source.is_image() {
            if ctx.phase.is_active() {
                tracing::debug!(phase = %ctx.phase, "Invalid selection during run; status kept");
            } else {
                ctx.set_status(StatusMessage::error(STATUS_INVALID));
            }
            return Err(DetourError::validation(format!(
                "'{}' has type {}, expected an image",
                source.name().unwrap_or("selection"),
                source.mime_type()
            )));
        }

        if ctx.phase.is_active() {
            tracing::debug!(phase = %ctx.phase, "Run in progress; selection ignored");
            return Ok(None);
        }

        ctx.run_id += 1;
        ctx.phase = RunPhase::SessionInit;
        ctx.source = Some(source.clone());
        replace_result(&mut ctx.result, None);
        ctx.set_status(StatusMessage::info(STATUS_LOADED));
        ctx.tracker.begin_run("Initializing model...");
        ctx.set_status(StatusMessage::info(STATUS_PROCESSING));

        Ok(Some(RunGuard {
            state: &self.state,
            run_id: ctx.run_id,
            finished: false,
        }))
    }

    async fn run(&self, guard: RunGuard<'_>, source: SourceImage) -> Result<RunOutcome> {
        let total_start = Instant::now();
        tracing::info!(bytes = source.bytes().len(), mime = source.mime_type(), "Run started");

        let created = self.sessions.get_or_init().await;
        let session = match created {
            Ok(session) => session,
            Err(e) => return Err(guard.fail(e.into_adapter_failure())),
        };
        let session_ms = elapsed_ms(total_start);
        guard.session_ready();

        let inference_start = Instant::now();
        let on_progress = |fraction: f32| guard.inference_progress(fraction);
        let inferred = session.remove_background(&source, &on_progress).await;
        let raw = match inferred {
            Ok(raw) => raw,
            Err(e) => return Err(guard.fail(e.into_adapter_failure())),
        };
        let inference_ms = elapsed_ms(inference_start);
        tracing::info!(bytes = raw.len(), inference_ms, "Inference finished");
        guard.inference_done(self.registry.acquire(raw.clone()));

        let crop_start = Instant::now();
        let scanned = self.crop_result(&guard, raw).await;
        let cropped = match scanned {
            Ok(cropped) => cropped,
            Err(e) => return Err(guard.fail(e)),
        };
        let crop_ms = elapsed_ms(crop_start);

        let (kind, result_bytes, handle) = match cropped {
            Some((bounds, (source_width, source_height), image)) => (
                FinishKind::Cropped {
                    bounds,
                    source_width,
                    source_height,
                },
                image.len(),
                Some(self.registry.acquire(image)),
            ),
            None => (
                FinishKind::Transparent,
                guard.with(|ctx| ctx.result.as_ref().map_or(0, |h| h.image().len())),
                None,
            ),
        };

        let summary = RunSummary {
            run_id: guard.run_id(),
            kind,
            result_bytes,
            session_ms,
            inference_ms,
            crop_ms,
            total_ms: elapsed_ms(total_start),
            finished_at: Utc::now(),
        };
        tracing::info!(kind = ?summary.kind, total_ms = summary.total_ms, "Run finished");
        guard.finish(handle, &summary);
        Ok(RunOutcome::Completed(summary))
    }

    /// Decode the raw output, scan alpha and encode the cropped region
    ///
    /// Returns `None` when nothing is opaque enough to keep.
    async fn crop_result(
        &self,
        guard: &RunGuard<'_>,
        raw: EncodedImage,
    ) -> Result<Option<(BoundingBox, (u32, u32), EncodedImage)>> {
        let options = self.config.crop;
        guard.crop_progress(CROP_DECODE_PERCENT, "Cropping...");

        let scanned = blocking(DetourError::decode, move || {
            let raster = ImageIOService::decode_raster(raw.bytes())?;
            let bounds = content_bounds(&raster, options.alpha_threshold);
            Ok((raster, bounds))
        })
        .await?;
        guard.crop_progress(CROP_FINALIZE_PERCENT, "Finalizing...");

        let (raster, Some(tight)) = scanned else {
            tracing::info!(threshold = options.alpha_threshold, "No content above alpha threshold");
            return Ok(None);
        };

        let size = (raster.width(), raster.height());
        let bounds = tight.expand(options.margin, size.0, size.1);
        tracing::debug!(%tight, %bounds, "Cropping to content");

        let image = blocking(DetourError::encode, move || {
            let region: PixelRaster = extract_region(&raster, bounds)?;
            ImageIOService::encode_png(&region)
        })
        .await?;
        Ok(Some((bounds, size, image)))
    }

    /// Return to `Idle`, dropping the selection and releasing the result
    ///
    /// Ignored (returns `false`) while a run is in flight.
    pub fn reset(&self) -> bool {
        let mut ctx = lock(&self.state);
        if ctx.phase.is_active() {
            tracing::debug!(phase = %ctx.phase, "Reset ignored during active run");
            return false;
        }
        ctx.phase = RunPhase::Idle;
        ctx.source = None;
        replace_result(&mut ctx.result, None);
        ctx.status = None;
        ctx.tracker.hide();
        true
    }

    /// The published result, only available in `Done`
    #[must_use]
    pub fn download(&self) -> Option<Download> {
        let ctx = lock(&self.state);
        if ctx.phase != RunPhase::Done {
            return None;
        }
        ctx.result.as_ref().map(|handle| Download {
            file_name: self.config.download_name.clone(),
            url: handle.url(),
            image: handle.image().clone(),
        })
    }

    /// Write the published result into `dir` under the configured file name
    ///
    /// # Errors
    /// - `Validation` when no result is ready
    /// - File system errors
    pub async fn save_download<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let download = self
            .download()
            .ok_or_else(|| DetourError::validation("No result is ready to download"))?;
        ImageIOService::save_payload(dir.as_ref(), &download.file_name, download.image.bytes())
            .await
    }

    #[must_use]
    pub fn snapshot(&self) -> ProcessorSnapshot {
        let ctx = lock(&self.state);
        let result_url = (ctx.phase == RunPhase::Done)
            .then(|| ctx.result.as_ref().map(ResultHandle::url))
            .flatten();
        ProcessorSnapshot {
            phase: ctx.phase,
            run_id: ctx.run_id,
            progress: ctx.tracker.snapshot(),
            status: ctx.status.clone(),
            source_name: ctx
                .source
                .as_ref()
                .and_then(|s| s.name().map(str::to_string)),
            result_url,
        }
    }

    #[must_use]
    pub fn phase(&self) -> RunPhase {
        lock(&self.state).phase
    }

    /// Whether the inference session has been created
    #[must_use]
    pub fn session_ready(&self) -> bool {
        self.sessions.is_ready()
    }

    /// Registry tracking live result handles
    #[must_use]
    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &DetourConfig {
        &self.config
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Run CPU-bound work off the async executor
async fn blocking<T, F>(on_join_error: fn(String) -> DetourError, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| on_join_error(format!("worker task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackend, MockFailure};
    use crate::services::{ChannelProgressReporter, PipelineEvent, ProgressValue};

    fn processor(backend: &MockBackend) -> DetourProcessor {
        DetourProcessor::with_backend(DetourConfig::default(), Arc::new(backend.clone())).unwrap()
    }

    fn png_with_dot(width: u32, height: u32, dot: (u32, u32)) -> SourceImage {
        let mut raster = PixelRaster::filled(width, height, [0, 0, 0, 0]);
        raster.set_pixel(dot.0, dot.1, [255, 255, 255, 255]);
        let encoded = ImageIOService::encode_png(&raster).unwrap();
        SourceImage::new(encoded.bytes().to_vec(), "image/png").with_name("dot.png")
    }

    #[tokio::test]
    async fn test_successful_run_crops_and_publishes() {
        let backend = MockBackend::new();
        let processor = processor(&backend);

        let outcome = processor.select(png_with_dot(10, 10, (5, 5))).await.unwrap();
        let summary = outcome.summary().unwrap().clone();
        assert_eq!(summary.run_id, 1);
        assert!(matches!(summary.kind, FinishKind::Cropped { .. }));

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Done);
        assert_eq!(snapshot.progress.percent, Some(100));
        assert_eq!(snapshot.status, Some(StatusMessage::info("Done!")));
        assert!(snapshot.result_ready());
        assert_eq!(snapshot.source_name.as_deref(), Some("dot.png"));

        let download = processor.download().unwrap();
        assert_eq!(download.file_name, "imgralph-detoure.png");
        let raster = ImageIOService::decode_raster(download.image.bytes()).unwrap();
        assert_eq!((raster.width(), raster.height()), (3, 3));
        assert_eq!(processor.registry().live_count(), 1);
    }

    #[tokio::test]
    async fn test_transparent_result_keeps_raw_output() {
        let backend = MockBackend::new().transparent_output(10, 10);
        let processor = processor(&backend);

        let outcome = processor.select(png_with_dot(4, 4, (0, 0))).await.unwrap();
        assert_eq!(outcome.summary().unwrap().kind, FinishKind::Transparent);

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Done);
        assert_eq!(
            snapshot.status,
            Some(StatusMessage::info("Image is entirely transparent."))
        );
        let raster =
            ImageIOService::decode_raster(processor.download().unwrap().image.bytes()).unwrap();
        assert_eq!((raster.width(), raster.height()), (10, 10));
        assert_eq!(processor.registry().live_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_mime_changes_nothing() {
        let backend = MockBackend::new();
        let processor = processor(&backend);

        let err = processor
            .select(SourceImage::new(b"%PDF".to_vec(), "application/pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, DetourError::Validation(_)));

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Idle);
        assert_eq!(snapshot.run_id, 0);
        assert!(snapshot.status.unwrap().is_error);
        assert_eq!(backend.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_inference_failure_moves_to_failed() {
        let backend = MockBackend::new().failing_inference(MockFailure::Decode);
        let processor = processor(&backend);

        let err = processor.select(png_with_dot(4, 4, (1, 1))).await.unwrap_err();
        assert!(matches!(err, DetourError::InferenceFailure(_)));

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Failed);
        assert_eq!(snapshot.progress.percent, None);
        assert!(snapshot.status.unwrap().text.starts_with("Error: "));
        assert!(processor.download().is_none());
        assert_eq!(processor.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_runtime_keeps_dependency_error() {
        let backend = MockBackend::new().failing_init_with(MockFailure::Dependency);
        let processor = processor(&backend);

        let err = processor.select(png_with_dot(4, 4, (1, 1))).await.unwrap_err();
        assert!(matches!(err, DetourError::DependencyUnavailable(_)));
        assert_eq!(processor.phase(), RunPhase::Failed);
        assert!(!processor.session_ready());
    }

    #[tokio::test]
    async fn test_undecodable_inference_output_fails_in_cropping() {
        let backend = MockBackend::new()
            .with_output(crate::backends::test_utils::MockOutput::Fixed(EncodedImage::png(
                b"garbage".to_vec(),
            )));
        let processor = processor(&backend);

        let err = processor.select(png_with_dot(4, 4, (1, 1))).await.unwrap_err();
        assert!(matches!(err, DetourError::DecodeFailure(_)));
        assert_eq!(processor.phase(), RunPhase::Failed);
        assert_eq!(processor.registry().live_count(), 0);
        assert_eq!(processor.registry().released_count(), 1);
    }

    #[tokio::test]
    async fn test_progress_sequence_is_ordered() {
        let backend = MockBackend::new().with_progress_script(vec![0.0, 0.25, f32::NAN, 0.1, 1.0]);
        let (reporter, mut events) = ChannelProgressReporter::new();
        let processor = processor(&backend).with_reporter(Box::new(reporter));

        processor.select(png_with_dot(6, 6, (2, 3))).await.unwrap();
        drop(processor);

        let mut values = Vec::new();
        while let Some(event) = events.recv().await {
            if let PipelineEvent::Progress(update) = event {
                values.push(update.value);
            }
        }

        assert_eq!(
            values,
            vec![
                ProgressValue::Indeterminate,
                ProgressValue::Percent(5),
                ProgressValue::Percent(5),
                ProgressValue::Percent(25),
                ProgressValue::Indeterminate,
                ProgressValue::Percent(25),
                ProgressValue::Percent(85),
                ProgressValue::Percent(85),
                ProgressValue::Percent(90),
                ProgressValue::Percent(95),
                ProgressValue::Percent(100),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_releases_result() {
        let backend = MockBackend::new();
        let processor = processor(&backend);
        processor.select(png_with_dot(5, 5, (2, 2))).await.unwrap();
        assert_eq!(processor.registry().live_count(), 1);

        assert!(processor.reset());
        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Idle);
        assert_eq!(snapshot.progress.percent, None);
        assert!(snapshot.status.is_none());
        assert!(snapshot.source_name.is_none());
        assert_eq!(processor.registry().live_count(), 0);
    }

    #[tokio::test]
    async fn test_second_run_replaces_first_result() {
        let backend = MockBackend::new();
        let processor = processor(&backend);
        processor.select(png_with_dot(5, 5, (2, 2))).await.unwrap();
        let first = processor.download().unwrap().url;

        let outcome = processor.select(png_with_dot(8, 8, (1, 6))).await.unwrap();
        assert_eq!(outcome.summary().unwrap().run_id, 2);
        assert_ne!(processor.download().unwrap().url, first);
        assert_eq!(processor.registry().live_count(), 1);
        assert_eq!(backend.sessions_created(), 1);
    }

    #[tokio::test]
    async fn test_selection_during_run_is_ignored() {
        let backend = MockBackend::new().gated();
        let processor = processor(&backend);

        let (first, second) = tokio::join!(processor.select(png_with_dot(5, 5, (2, 2))), async {
            backend.inference_started().await;
            assert_eq!(processor.phase(), RunPhase::Inferring);
            assert!(!processor.reset());
            let outcome = processor.select(png_with_dot(5, 5, (1, 1))).await;
            backend.release();
            outcome
        });

        assert!(first.unwrap().summary().is_some());
        assert!(second.unwrap().is_ignored());
        assert_eq!(backend.inference_calls(), 1);
        assert_eq!(processor.snapshot().run_id, 1);
    }

    #[tokio::test]
    async fn test_invalid_selection_during_run_keeps_run_status() {
        let backend = MockBackend::new().gated();
        let processor = processor(&backend);

        let (first, second) = tokio::join!(processor.select(png_with_dot(5, 5, (2, 2))), async {
            backend.inference_started().await;
            let before = processor.snapshot().status;
            let outcome = processor
                .select(SourceImage::new(b"plain text".to_vec(), "text/plain"))
                .await;
            assert_eq!(processor.snapshot().status, before);
            assert_eq!(processor.phase(), RunPhase::Inferring);
            backend.release();
            outcome
        });

        assert!(matches!(second.unwrap_err(), DetourError::Validation(_)));
        assert!(first.unwrap().summary().is_some());
        assert_eq!(processor.snapshot().status.unwrap().text, STATUS_DONE);
    }

    #[tokio::test]
    async fn test_dropped_run_fails_and_releases() {
        let backend = MockBackend::new().gated();
        let processor = processor(&backend);

        {
            let run = processor.select(png_with_dot(5, 5, (2, 2)));
            tokio::pin!(run);
            tokio::select! {
                _ = &mut run => panic!("gated run must not finish"),
                () = backend.inference_started() => {},
            }
        }

        let snapshot = processor.snapshot();
        assert_eq!(snapshot.phase, RunPhase::Failed);
        assert!(snapshot.status.unwrap().is_error);
        assert_eq!(processor.registry().live_count(), 0);

        backend.release();
        let outcome = processor.select(png_with_dot(5, 5, (2, 2))).await.unwrap();
        assert!(outcome.summary().is_some());
    }

    #[tokio::test]
    async fn test_save_download_requires_done() {
        let temp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::new();
        let processor = processor(&backend);

        assert!(matches!(
            processor.save_download(temp.path()).await,
            Err(DetourError::Validation(_))
        ));

        processor.select(png_with_dot(5, 5, (2, 2))).await.unwrap();
        let path = processor.save_download(temp.path()).await.unwrap();
        assert_eq!(path, temp.path().join("imgralph-detoure.png"));
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
