//! Model weight download
//!
//! Weights are streamed into a temporary file next to their final location,
//! checked against the configured SHA-256 digest and then persisted with a
//! rename, so a partial download never appears in the cache.

use crate::cache::{format_size, ModelCache};
use crate::config::ModelConfig;
use crate::error::{DetourError, Result};
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;

/// Download progress indicator that works with and without the CLI feature
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    fn new(show: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if show {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        let _ = show;
        Self::NoOp
    }

    fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {
                let _ = len;
            },
        }
    }

    fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {
                let _ = pos;
            },
        }
    }

    fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {
                let _ = msg;
            },
        }
    }
}

/// Downloads model weights into a `ModelCache`
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
    show_progress: bool,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| DetourError::network_error("Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            cache,
            show_progress: false,
        })
    }

    /// Show an indicatif bar while downloading (CLI builds only)
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Download the weights described by `model` unless they are already cached
    ///
    /// # Errors
    /// - Network or HTTP errors
    /// - File system errors while writing the cache
    /// - Digest mismatch when `model.sha256` is set
    pub async fn ensure_model(&self, model: &ModelConfig) -> Result<PathBuf> {
        let final_path = self.cache.model_path(&model.model_id);
        if self.cache.is_cached(&model.model_id) {
            log::debug!("Model {} already cached", model.model_id);
            return Ok(final_path);
        }

        log::info!("Downloading model {} from {}", model.model_id, model.url);
        let progress = ProgressIndicator::new(self.show_progress);

        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(self.cache.cache_dir())
            .map_err(|e| DetourError::file_io_error("create temporary file", self.cache.cache_dir(), &e))?;

        let written = match self.stream_to(&model.url, temp.path(), &progress).await {
            Ok(written) => written,
            Err(e) => {
                progress.finish_with_message("❌ Download failed".to_string());
                return Err(e);
            },
        };

        if !verify_file_integrity(temp.path(), model.sha256.as_deref())? {
            progress.finish_with_message("❌ Checksum mismatch".to_string());
            return Err(DetourError::model(format!(
                "Downloaded weights for {} do not match the expected SHA-256",
                model.model_id
            )));
        }

        temp.persist(&final_path)
            .map_err(|e| DetourError::file_io_error("move downloaded model to cache", &final_path, &e.error))?;

        progress.finish_with_message(format!("✅ Downloaded {}", model.model_id));
        log::info!(
            "Cached model {} ({})",
            model.model_id,
            format_size(written)
        );
        Ok(final_path)
    }

    async fn stream_to(&self, url: &str, path: &Path, progress: &ProgressIndicator) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DetourError::network_error(format!("Failed to download {}", url), e))?;

        if !response.status().is_success() {
            return Err(DetourError::network_error(
                format!("Failed to download {}", url),
                format!("HTTP {}", response.status()),
            ));
        }

        if let Some(total) = response.content_length() {
            progress.set_length(total);
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| DetourError::file_io_error("create file", path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 64 * 1024];
        loop {
            let bytes_read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| DetourError::network_error("Failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| DetourError::file_io_error("write to file", path, &e))?;
            downloaded += bytes_read as u64;
            progress.set_position(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| DetourError::file_io_error("flush file", path, &e))?;

        if downloaded == 0 {
            return Err(DetourError::network_error(
                format!("Failed to download {}", url),
                "empty response body",
            ));
        }
        Ok(downloaded)
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Hex-encoded SHA-256 of `bytes`
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check a file against an expected SHA-256; no digest means nothing to check
///
/// # Errors
/// - The file cannot be read
pub fn verify_file_integrity(file_path: &Path, expected_hash: Option<&str>) -> Result<bool> {
    let Some(expected) = expected_hash else {
        return Ok(true);
    };

    let contents = std::fs::read(file_path)
        .map_err(|e| DetourError::file_io_error("read file for verification", file_path, &e))?;
    let actual = sha256_hex(&contents);

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(true)
    } else {
        log::warn!(
            "Integrity check failed for {}: expected {}, got {}",
            file_path.display(),
            expected,
            actual
        );
        Ok(false)
    }
}
