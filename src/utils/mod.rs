//! Shared helpers used by the inference backends

pub mod preprocessing;

pub use preprocessing::{U2NetPreprocessor, U2NET_INPUT_SIZE, U2NET_MEAN, U2NET_STD};
