//! Terminal progress bar for detourage runs

use crate::{
    services::{ProcessingStage, ProgressReporter, ProgressUpdate, ProgressValue, StatusMessage},
    types::{FinishKind, RunSummary},
};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Drives an indicatif bar from processor events
///
/// Percent updates move the bar, indeterminate updates turn on the spinner
/// tick and a hidden indicator clears the line. A finished bar is replaced by
/// a fresh one when the next run starts.
pub(crate) struct IndicatifProgressReporter {
    bar: Mutex<ProgressBar>,
}

impl IndicatifProgressReporter {
    pub(crate) fn new() -> Self {
        Self {
            bar: Mutex::new(Self::new_bar()),
        }
    }

    fn new_bar() -> ProgressBar {
        let bar = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        let mut bar = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if bar.is_finished() {
            *bar = Self::new_bar();
        }
        f(&bar);
    }
}

impl ProgressReporter for IndicatifProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if update.value == ProgressValue::Hidden {
            self.bar
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .finish_and_clear();
            return;
        }

        self.with_bar(|bar| match update.value {
            ProgressValue::Percent(pct) => {
                bar.disable_steady_tick();
                bar.set_position(u64::from(pct));
                bar.set_message(update.description);
            },
            _ => {
                bar.enable_steady_tick(Duration::from_millis(100));
                bar.set_message(update.description);
            },
        });
    }

    fn report_status(&self, status: StatusMessage) {
        if status.is_error {
            self.bar
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .suspend(|| eprintln!("❌ {}", status.text));
        } else {
            tracing::debug!(status = %status.text, "Status changed");
        }
    }

    fn report_completion(&self, summary: &RunSummary) {
        let message = match summary.kind {
            FinishKind::Cropped { bounds, .. } => format!(
                "✅ cropped to {}x{} in {}ms",
                bounds.width(),
                bounds.height(),
                summary.total_ms
            ),
            FinishKind::Transparent => format!("⚠️  entirely transparent ({}ms)", summary.total_ms),
        };
        self.bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish_with_message(message);
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        tracing::debug!(stage = stage.description(), error, "Run failed");
    }
}
