//! Configuration types for detourage runs

use crate::crop::CropOptions;
use crate::error::{DetourError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Segmentation model used by default
pub const DEFAULT_MODEL_ID: &str = "u2netp";

/// Pinned download location of the default model weights
pub const DEFAULT_MODEL_URL: &str =
    "https://huggingface.co/tomjackson2023/rembg/resolve/main/u2netp.onnx?download=true";

/// File name offered for the download
pub const DEFAULT_DOWNLOAD_NAME: &str = "imgralph-detoure.png";

/// Inference runtime used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Pure Rust inference (Tract)
    #[default]
    Tract,
    /// ONNX Runtime
    Onnx,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tract => write!(f, "tract"),
            Self::Onnx => write!(f, "onnx"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = DetourError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tract" => Ok(Self::Tract),
            "onnx" | "ort" => Ok(Self::Onnx),
            other => Err(DetourError::invalid_config(format!(
                "Unknown backend '{}'. Expected 'tract' or 'onnx'",
                other
            ))),
        }
    }
}

/// Runtime settings for the inference session
///
/// These are environment-compatibility settings, not user tunables: a single
/// thread keeps the runtime usable where shared-memory threading is not
/// available, and SIMD is always on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Inference threads (intra and inter op)
    pub num_threads: usize,
    /// Allow vectorized kernels
    pub simd: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            num_threads: 1,
            simd: true,
        }
    }
}

/// Where the model weights come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier (also the cache file stem)
    pub model_id: String,
    /// Pinned weights URL
    pub url: String,
    /// Expected SHA-256 of the weights, hex encoded
    pub sha256: Option<String>,
    /// Use this ONNX file instead of the cache/download
    pub local_path: Option<PathBuf>,
    /// Override the model cache directory
    pub cache_dir: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            url: DEFAULT_MODEL_URL.to_string(),
            sha256: None,
            local_path: None,
            cache_dir: None,
        }
    }
}

/// Configuration for the detourage processor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetourConfig {
    /// Inference runtime
    pub backend: BackendType,

    /// Model source
    pub model: ModelConfig,

    /// Session settings
    pub session: SessionOptions,

    /// Alpha threshold and margin used for the crop
    pub crop: CropOptions,

    /// File name of the downloaded PNG
    pub download_name: String,
}

impl Default for DetourConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            model: ModelConfig::default(),
            session: SessionOptions::default(),
            crop: CropOptions::default(),
            download_name: DEFAULT_DOWNLOAD_NAME.to_string(),
        }
    }
}

impl DetourConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use imgralph::{BackendType, DetourConfig};
    ///
    /// let config = DetourConfig::builder()
    ///     .backend(BackendType::Onnx)
    ///     .alpha_threshold(16)
    ///     .download_name("detourage.png")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.crop.margin, 1);
    /// ```
    #[must_use]
    pub fn builder() -> DetourConfigBuilder {
        DetourConfigBuilder::default()
    }

    /// Load a JSON configuration file; missing fields take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON or invalid values
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DetourError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            DetourError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Thread count of zero
    /// - Empty model id or URL without a local model path
    /// - Download name that is empty, contains a path separator or is not `.png`
    pub fn validate(&self) -> Result<()> {
        if self.session.num_threads == 0 {
            return Err(DetourError::config_value_error(
                "thread count",
                self.session.num_threads,
                ">= 1",
                Some(1),
            ));
        }

        if self.model.model_id.trim().is_empty() {
            return Err(DetourError::invalid_config("model id must not be empty"));
        }

        if self.model.local_path.is_none() && !self.model.url.starts_with("https://") {
            return Err(DetourError::invalid_config(format!(
                "model URL must use https: '{}'",
                self.model.url
            )));
        }

        let name = self.download_name.as_str();
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || !name.to_ascii_lowercase().ends_with(".png")
        {
            return Err(DetourError::invalid_config(format!(
                "download name must be a plain '*.png' file name, got '{}'",
                name
            )));
        }

        Ok(())
    }
}

/// Builder for `DetourConfig`
#[derive(Debug, Default)]
pub struct DetourConfigBuilder {
    config: DetourConfig,
}

impl DetourConfigBuilder {
    #[must_use]
    pub fn backend(mut self, backend: BackendType) -> Self {
        self.config.backend = backend;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    /// Use a local ONNX file instead of downloading the model
    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model.local_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn alpha_threshold(mut self, threshold: u8) -> Self {
        self.config.crop.alpha_threshold = threshold;
        self
    }

    #[must_use]
    pub fn margin(mut self, margin: u32) -> Self {
        self.config.crop.margin = margin;
        self
    }

    #[must_use]
    pub fn download_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.download_name = name.into();
        self
    }

    #[must_use]
    pub fn session(mut self, session: SessionOptions) -> Self {
        self.config.session = session;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// - Any validation failure, see [`DetourConfig::validate`]
    pub fn build(self) -> Result<DetourConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = DetourConfig::default();
        assert_eq!(config.backend, BackendType::Tract);
        assert_eq!(config.model.model_id, "u2netp");
        assert!(config.model.url.contains("u2netp.onnx"));
        assert_eq!(config.session.num_threads, 1);
        assert!(config.session.simd);
        assert_eq!(config.crop.alpha_threshold, 8);
        assert_eq!(config.crop.margin, 1);
        assert_eq!(config.download_name, "imgralph-detoure.png");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let config = DetourConfig::builder()
            .backend(BackendType::Onnx)
            .alpha_threshold(0)
            .margin(4)
            .download_name("detourage.png")
            .model_path("/models/u2netp.onnx")
            .build()
            .unwrap();

        assert_eq!(config.backend, BackendType::Onnx);
        assert_eq!(config.crop.alpha_threshold, 0);
        assert_eq!(config.crop.margin, 4);
        assert_eq!(config.download_name, "detourage.png");
        assert_eq!(
            config.model.local_path.as_deref(),
            Some(Path::new("/models/u2netp.onnx"))
        );
    }

    #[test]
    fn test_validation_rejects_bad_download_names() {
        for name in ["", "out.jpg", "dir/out.png", "..\\out.png"] {
            let result = DetourConfig::builder().download_name(name).build();
            assert!(result.is_err(), "{name:?} should be rejected");
        }
        assert!(DetourConfig::builder()
            .download_name("RESULT.PNG")
            .build()
            .is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_threads() {
        let err = DetourConfig::builder()
            .session(SessionOptions {
                num_threads: 0,
                simd: true,
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("thread count"));
    }

    #[test]
    fn test_validation_requires_https_without_local_model() {
        let mut config = DetourConfig::default();
        config.model.url = "http://example.com/model.onnx".to_string();
        assert!(config.validate().is_err());

        config.model.local_path = Some(PathBuf::from("model.onnx"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert_eq!("ort".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert!("cuda".parse::<BackendType>().is_err());
        assert_eq!(BackendType::Onnx.to_string(), "onnx");
    }

    #[test]
    fn test_json_file_with_partial_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("imgralph.json");
        std::fs::write(
            &path,
            r#"{ "backend": "onnx", "download_name": "detourage.png", "crop": { "alpha_threshold": 20, "margin": 2 } }"#,
        )
        .unwrap();

        let config = DetourConfig::from_json_file(&path).unwrap();
        assert_eq!(config.backend, BackendType::Onnx);
        assert_eq!(config.download_name, "detourage.png");
        assert_eq!(config.crop.alpha_threshold, 20);
        assert_eq!(config.crop.margin, 2);
        assert_eq!(config.model, ModelConfig::default());
    }

    #[test]
    fn test_json_file_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "crop": { "alpha_threshold": 300, "margin": 1 } }"#).unwrap();
        assert!(matches!(
            DetourConfig::from_json_file(&path),
            Err(DetourError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serde_roundtrip_preserves_config() {
        let config = DetourConfig::builder()
            .backend(BackendType::Onnx)
            .margin(0)
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: DetourConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
