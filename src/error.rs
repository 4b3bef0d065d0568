//! Error types for the detourage pipeline

use thiserror::Error;

/// Result type alias for detourage operations
pub type Result<T> = std::result::Result<T, DetourError>;

/// Error taxonomy for the select → infer → crop → publish pipeline
///
/// Only `Validation` is recovered locally. Every other variant aborts the
/// current run and moves the processor to `Failed`.
#[derive(Error, Debug)]
pub enum DetourError {
    /// The selected file is not an image
    #[error("Invalid file: {0}")]
    Validation(String),

    /// The segmentation backend or its runtime is not available
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// The segmentation call (or session creation) failed
    #[error("Background removal failed: {0}")]
    InferenceFailure(String),

    /// An image payload could not be decoded into a raster
    #[error("Image decoding failed: {0}")]
    DecodeFailure(String),

    /// A raster could not be re-encoded
    #[error("Image encoding failed: {0}")]
    EncodeFailure(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model resolution or loading errors
    #[error("Model error: {0}")]
    Model(String),

    /// Model download errors
    #[error("Network error: {0}")]
    Network(String),
}

impl DetourError {
    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new dependency-unavailable error
    pub fn dependency_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::DependencyUnavailable(msg.into())
    }

    /// Create a new inference error
    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailure(msg.into())
    }

    /// Create a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::DecodeFailure(msg.into())
    }

    /// Create a new encode error
    pub fn encode<S: Into<String>>(msg: S) -> Self {
        Self::EncodeFailure(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new model error
    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create a network error with context
    pub fn network_error<S: AsRef<str>, E: std::fmt::Display>(context: S, error: E) -> Self {
        Self::Network(format!("{}: {}", context.as_ref(), error))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Classify an error raised by the segmentation adapter
    ///
    /// Missing runtimes keep their identity; anything else the adapter
    /// rejects with is reported as an inference failure.
    #[must_use]
    pub fn into_adapter_failure(self) -> Self {
        match self {
            Self::DependencyUnavailable(_) | Self::InferenceFailure(_) => self,
            other => Self::InferenceFailure(other.to_string()),
        }
    }

    /// Whether this error aborts a run (everything except validation)
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = DetourError::validation("not an image");
        assert!(matches!(err, DetourError::Validation(_)));
        assert!(!err.is_fatal());

        let err = DetourError::encode("no bytes produced");
        assert!(matches!(err, DetourError::EncodeFailure(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = DetourError::invalid_config("Invalid model path");
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model path");

        let err = DetourError::dependency_unavailable("tract backend not compiled in");
        assert_eq!(
            err.to_string(),
            "Dependency unavailable: tract backend not compiled in"
        );
    }

    #[test]
    fn test_adapter_failure_classification() {
        let err = DetourError::decode("corrupt jpeg").into_adapter_failure();
        assert!(matches!(err, DetourError::InferenceFailure(_)));
        assert!(err.to_string().contains("corrupt jpeg"));

        let err = DetourError::dependency_unavailable("ort").into_adapter_failure();
        assert!(matches!(err, DetourError::DependencyUnavailable(_)));

        let err = DetourError::inference("boom").into_adapter_failure();
        assert_eq!(err.to_string(), "Background removal failed: boom");
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = DetourError::file_io_error("read input", Path::new("/tmp/cat.png"), &io_error);
        let message = err.to_string();
        assert!(message.contains("read input"));
        assert!(message.contains("/tmp/cat.png"));

        let err = DetourError::config_value_error("threads", 0, ">= 1", Some(1));
        let message = err.to_string();
        assert!(message.contains("threads"));
        assert!(message.contains("Recommended: 1"));
    }
}
