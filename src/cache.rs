//! On-disk cache for downloaded model weights
//!
//! Each model is stored as a single `<model_id>.onnx` file. The cache lives
//! under the platform cache directory unless `IMGRALPH_CACHE_DIR` or the
//! configuration points somewhere else.

use crate::error::{DetourError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV: &str = "IMGRALPH_CACHE_DIR";

/// Model weight cache
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the cache at the configured, environment or platform location
    ///
    /// # Errors
    /// - No cache directory could be determined
    /// - The directory cannot be created
    pub fn new(config_override: Option<&Path>) -> Result<Self> {
        let env_override = std::env::var(CACHE_DIR_ENV).ok();
        let cache_dir = Self::resolve_dir(config_override, env_override.as_deref())?;
        Self::with_dir(cache_dir)
    }

    /// Open the cache at an explicit directory
    ///
    /// # Errors
    /// - The directory cannot be created
    pub fn with_dir<P: Into<PathBuf>>(cache_dir: P) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)
            .map_err(|e| DetourError::file_io_error("create cache directory", &cache_dir, &e))?;
        log::debug!("Model cache at {}", cache_dir.display());
        Ok(Self { cache_dir })
    }

    /// Pick the cache directory: configuration, then environment, then platform default
    ///
    /// # Errors
    /// - No override is given and the platform has no cache directory
    pub fn resolve_dir(config_override: Option<&Path>, env_override: Option<&str>) -> Result<PathBuf> {
        if let Some(dir) = config_override {
            return Ok(dir.to_path_buf());
        }
        if let Some(dir) = env_override.filter(|d| !d.trim().is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        dirs::cache_dir()
            .map(|dir| dir.join("imgralph").join("models"))
            .ok_or_else(|| {
                DetourError::invalid_config(format!(
                    "Cannot determine a cache directory; set {}",
                    CACHE_DIR_ENV
                ))
            })
    }

    /// Path of the weights file for `model_id`
    #[must_use]
    pub fn model_path(&self, model_id: &str) -> PathBuf {
        let stem: String = model_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{stem}.onnx"))
    }

    /// Whether a non-empty weights file exists for `model_id`
    #[must_use]
    pub fn is_cached(&self, model_id: &str) -> bool {
        fs::metadata(self.model_path(model_id)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    /// Remove the cached weights of `model_id`; returns whether a file was removed
    ///
    /// # Errors
    /// - The file exists but cannot be removed
    pub fn remove(&self, model_id: &str) -> Result<bool> {
        let path = self.model_path(model_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .map_err(|e| DetourError::file_io_error("remove cached model", &path, &e))?;
        log::info!("Removed cached model {}", model_id);
        Ok(true)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format a byte count for display
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS.get(unit).copied().unwrap_or("GB"))
    }
}
