//! Inference runtimes for the segmentation model
//!
//! - Tract backend (pure Rust, default)
//! - ONNX Runtime backend
//!
//! A runtime whose feature is disabled is replaced by
//! `inference::UnavailableBackend`, which reports `DependencyUnavailable`.

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

// Test utilities for backend testing
#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
