//! Model resolution: local file, cache, or download

use crate::cache::{format_size, ModelCache};
use crate::config::ModelConfig;
use crate::download::{verify_file_integrity, ModelDownloader};
use crate::error::{DetourError, Result};
use std::path::{Path, PathBuf};

/// Where a model's weights were found
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// Model file given explicitly on disk
    External(PathBuf),
    /// Model stored in the download cache under this id
    Downloaded(String),
}

impl ModelSource {
    /// Display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) => format!("cached:{}", model_id),
        }
    }
}

/// Weights ready to be handed to a runtime
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub source: ModelSource,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

impl LoadedModel {
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Resolves a `ModelConfig` to weights on disk
#[derive(Debug, Clone, Default)]
pub struct ModelManager {
    show_download_progress: bool,
}

impl ModelManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a download progress bar when the weights are fetched
    #[must_use]
    pub fn with_download_progress(mut self, show: bool) -> Self {
        self.show_download_progress = show;
        self
    }

    /// Locate (downloading if needed) and read the model weights
    ///
    /// A configured `local_path` wins; otherwise the cache is consulted and
    /// the pinned URL is fetched on a miss.
    ///
    /// # Errors
    /// - Local file missing or unreadable
    /// - Download or checksum failure
    pub async fn load(&self, model: &ModelConfig) -> Result<LoadedModel> {
        let (source, path) = match &model.local_path {
            Some(path) => (ModelSource::External(path.clone()), path.clone()),
            None => {
                let cache = ModelCache::new(model.cache_dir.as_deref())?;
                let downloader =
                    ModelDownloader::new(cache)?.with_progress(self.show_download_progress);
                let path = downloader.ensure_model(model).await?;
                (ModelSource::Downloaded(model.model_id.clone()), path)
            },
        };

        let loaded = Self::read_weights(source, path, model.sha256.clone()).await?;
        log::info!(
            "Model {} ready ({})",
            loaded.source.display_name(),
            format_size(loaded.size_bytes() as u64)
        );
        Ok(loaded)
    }

    async fn read_weights(
        source: ModelSource,
        path: PathBuf,
        sha256: Option<String>,
    ) -> Result<LoadedModel> {
        let read_path = path.clone();
        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            Self::validate_model_file(&read_path)?;
            if !verify_file_integrity(&read_path, sha256.as_deref())? {
                return Err(DetourError::model(format!(
                    "{} does not match the expected SHA-256",
                    read_path.display()
                )));
            }
            std::fs::read(&read_path)
                .map_err(|e| DetourError::file_io_error("read model file", &read_path, &e))
        })
        .await
        .map_err(|e| DetourError::model(format!("Model loader stopped: {e}")))??;

        Ok(LoadedModel {
            source,
            path,
            bytes,
        })
    }

    /// Check that `path` is a non-empty `.onnx` file
    ///
    /// # Errors
    /// - Missing file, wrong extension or empty file
    pub fn validate_model_file(path: &Path) -> Result<()> {
        let is_onnx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("onnx"));
        if !is_onnx {
            return Err(DetourError::model(format!(
                "Model file must have an .onnx extension: {}",
                path.display()
            )));
        }

        let metadata = std::fs::metadata(path)
            .map_err(|e| DetourError::file_io_error("open model file", path, &e))?;
        if !metadata.is_file() || metadata.len() == 0 {
            return Err(DetourError::model(format!(
                "Model file is empty or not a file: {}",
                path.display()
            )));
        }
        Ok(())
    }
}
