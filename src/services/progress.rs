//! Progress and status reporting service
//!
//! The processor publishes ordered progress and status events to a
//! `ProgressReporter`. Frontends (CLI progress bar, log output, channels
//! consumed by another task) implement the trait; the processor never formats
//! anything for display itself.

use crate::types::RunSummary;
use instant::Instant;
use tokio::sync::mpsc;

/// Percentage shown once the session is ready
pub const SESSION_READY_PERCENT: u8 = 5;
/// Upper bound of the inference sub-range; also shown when inference resolves
pub const INFERENCE_DONE_PERCENT: u8 = 85;
/// Shown while the inference output is decoded for cropping
pub const CROP_DECODE_PERCENT: u8 = 90;
/// Shown once the alpha scan has finished
pub const CROP_FINALIZE_PERCENT: u8 = 95;
/// Terminal percentage of a successful run
pub const COMPLETE_PERCENT: u8 = 100;

/// Map an adapter fraction in `[0, 1]` into the inference sub-range `[5, 85]`
///
/// Returns `None` for non-finite input, which callers treat as indeterminate
/// progress. Out-of-range fractions are clamped.
///
/// # Examples
/// ```rust
/// use imgralph::services::map_inference_progress;
///
/// assert_eq!(map_inference_progress(0.0), Some(5));
/// assert_eq!(map_inference_progress(0.5), Some(45));
/// assert_eq!(map_inference_progress(1.0), Some(85));
/// assert_eq!(map_inference_progress(f32::NAN), None);
/// ```
#[must_use]
pub fn map_inference_progress(fraction: f32) -> Option<u8> {
    if !fraction.is_finite() {
        return None;
    }
    let span = f32::from(INFERENCE_DONE_PERCENT - SESSION_READY_PERCENT);
    let pct = (f32::from(SESSION_READY_PERCENT) + fraction.clamp(0.0, 1.0) * span).round();
    Some(pct as u8)
}

/// Pipeline stages as seen by reporters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Creating or awaiting the inference session
    SessionInit,
    /// Running the segmentation model
    Inference,
    /// Scanning alpha and re-encoding the cropped region
    Cropping,
    /// Run finished
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::SessionInit => "Initializing model",
            ProcessingStage::Inference => "Removing background",
            ProcessingStage::Cropping => "Cropping to content",
            ProcessingStage::Completed => "Done",
        }
    }
}

/// What the progress indicator should show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressValue {
    /// Indicator cleared (idle, reset or failed run)
    Hidden,
    /// Working, percentage unknown
    Indeterminate,
    /// Known percentage, 0-100
    Percent(u8),
}

/// Progress update containing stage, value and timing information
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: ProcessingStage,
    pub value: ProgressValue,
    /// Label to show next to the indicator
    pub description: String,
    /// Elapsed time since the run started (milliseconds)
    pub elapsed_ms: u64,
}

/// Status line for the collaborator; errors carry `is_error`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub text: String,
    pub is_error: bool,
}

impl StatusMessage {
    pub fn info<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error<S: Into<String>>(text: S) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// Observer for pipeline events
///
/// Calls happen in run order while the processor holds its state lock, so
/// implementations must not call back into the processor.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report a status line change
    fn report_status(&self, status: StatusMessage);

    /// Report a finished run
    fn report_completion(&self, summary: &RunSummary) {
        let _ = summary;
    }

    /// Report a fatal error during a run
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_status(&self, _status: StatusMessage) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Progress reporter that writes to the log
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        let shown = match update.value {
            ProgressValue::Hidden => return,
            ProgressValue::Indeterminate => "...".to_string(),
            ProgressValue::Percent(pct) => format!("{}%", pct),
        };

        if self.verbose {
            log::info!(
                "[{}] {} ({}ms elapsed)",
                shown,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}] {}", shown, update.description);
        }
    }

    fn report_status(&self, status: StatusMessage) {
        if status.is_error {
            log::warn!("{}", status.text);
        } else {
            log::info!("{}", status.text);
        }
    }

    fn report_completion(&self, summary: &RunSummary) {
        log::info!("✅ Detourage completed in {}ms", summary.total_ms);

        if self.verbose {
            log::info!("  • Session: {}ms", summary.session_ms);
            log::info!("  • Inference: {}ms", summary.inference_ms);
            log::info!("  • Crop: {}ms", summary.crop_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("❌ Error during {}: {}", stage.description(), error);
    }
}

/// Event published by `ChannelProgressReporter`
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Progress(ProgressUpdate),
    Status(StatusMessage),
    Completed(RunSummary),
    Error {
        stage: ProcessingStage,
        message: String,
    },
}

/// Forwards every event into an unbounded channel
///
/// Sending never blocks, so ordering is preserved even though the receiving
/// task runs later. Events are dropped once the receiver is gone.
pub struct ChannelProgressReporter {
    sender: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelProgressReporter {
    /// Create a reporter and the receiving end of its channel
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: PipelineEvent) {
        if self.sender.send(event).is_err() {
            log::trace!("Progress receiver dropped; event discarded");
        }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.send(PipelineEvent::Progress(update));
    }

    fn report_status(&self, status: StatusMessage) {
        self.send(PipelineEvent::Status(status));
    }

    fn report_completion(&self, summary: &RunSummary) {
        self.send(PipelineEvent::Completed(summary.clone()));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.send(PipelineEvent::Error {
            stage,
            message: error.to_string(),
        });
    }
}

/// Point-in-time view of the progress indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Last numeric percentage; `None` while hidden
    pub percent: Option<u8>,
    /// Whether the indicator is in indeterminate mode
    pub indeterminate: bool,
}

/// Progress bookkeeping for one run
///
/// Percentages never decrease within a run; indeterminate updates keep the
/// last percentage and only set a flag.
pub struct ProgressTracker {
    reporter: Box<dyn ProgressReporter>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
    percent: u8,
    indeterminate: bool,
    visible: bool,
}

impl ProgressTracker {
    /// Create a new progress tracker with the specified reporter
    #[must_use]
    pub fn new(reporter: Box<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            start_time: Instant::now(),
            current_stage: None,
            percent: 0,
            indeterminate: false,
            visible: false,
        }
    }

    /// Create a progress tracker with no-op reporter (for testing/disabled progress)
    #[must_use]
    pub fn no_op() -> Self {
        Self::new(Box::new(NoOpProgressReporter))
    }

    /// Start a new run: reset to 0 and show an indeterminate indicator
    pub fn begin_run(&mut self, description: &str) {
        self.start_time = Instant::now();
        self.percent = 0;
        self.visible = true;
        self.set_indeterminate(ProcessingStage::SessionInit, description);
    }

    /// Report a numeric percentage; lower values than the current one are raised
    pub fn set_percent(&mut self, stage: ProcessingStage, percent: u8, description: &str) {
        self.percent = percent.min(COMPLETE_PERCENT).max(self.percent);
        self.indeterminate = false;
        self.visible = true;
        self.emit(stage, ProgressValue::Percent(self.percent), description);
    }

    /// Switch to indeterminate mode without touching the last percentage
    pub fn set_indeterminate(&mut self, stage: ProcessingStage, description: &str) {
        self.indeterminate = true;
        self.visible = true;
        self.emit(stage, ProgressValue::Indeterminate, description);
    }

    /// Clear the indicator
    pub fn hide(&mut self) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::SessionInit);
        self.percent = 0;
        self.indeterminate = false;
        self.visible = false;
        self.emit(stage, ProgressValue::Hidden, "");
    }

    fn emit(&mut self, stage: ProcessingStage, value: ProgressValue, description: &str) {
        self.current_stage = Some(stage);
        self.reporter.report_progress(ProgressUpdate {
            stage,
            value,
            description: description.to_string(),
            elapsed_ms: self.elapsed_ms(),
        });
    }

    pub fn report_status(&self, status: StatusMessage) {
        self.reporter.report_status(status);
    }

    pub fn report_completion(&self, summary: &RunSummary) {
        self.reporter.report_completion(summary);
    }

    /// Report an error against the current stage
    pub fn report_error(&self, error: &str) {
        let stage = self.current_stage.unwrap_or(ProcessingStage::SessionInit);
        self.reporter.report_error(stage, error);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            percent: self.visible.then_some(self.percent),
            indeterminate: self.visible && self.indeterminate,
        }
    }

    /// Get the elapsed time since the run started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}
