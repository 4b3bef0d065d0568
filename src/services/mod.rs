//! Services shared by the pipeline and its front ends
//!
//! - `format`: MIME type detection for selected files
//! - `io`: raster decoding, PNG encoding and payload persistence
//! - `progress`: progress mapping, tracking and reporters

pub mod format;
pub mod io;
pub mod progress;

pub use format::MimeDetector;
pub use io::ImageIOService;
pub use progress::{
    map_inference_progress, ChannelProgressReporter, ConsoleProgressReporter,
    NoOpProgressReporter, PipelineEvent, ProcessingStage, ProgressReporter, ProgressSnapshot,
    ProgressTracker, ProgressUpdate, ProgressValue, StatusMessage,
};
