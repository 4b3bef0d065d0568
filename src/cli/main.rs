//! imgralph command line tool
//!
//! Removes the background of an input image, crops the result to its
//! visible content and writes it as a PNG.

use super::config::CliConfigBuilder;
use super::progress::IndicatifProgressReporter;
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::{BackendType, DetourConfig},
    download::ModelDownloader,
    inference::create_backend_with,
    models::ModelManager,
    processor::{DetourProcessor, RunOutcome},
    services::{ConsoleProgressReporter, ProgressReporter},
    tracing_config::{init_cli_tracing, TracingFormat},
    types::{FinishKind, SourceImage},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Background removal with automatic crop to content
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgralph")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image file
    #[arg(value_name = "INPUT", required_unless_present_any = &["only_download", "clear_cache", "show_cache_dir"])]
    pub input: Option<PathBuf>,

    /// Output directory [default: current directory]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Inference backend (tract, onnx)
    #[arg(short, long)]
    pub backend: Option<BackendType>,

    /// Alpha values above this count as content when cropping
    #[arg(long, value_name = "0-255")]
    pub threshold: Option<u8>,

    /// Pixels kept around the content box
    #[arg(long)]
    pub margin: Option<u32>,

    /// Model weights: path to an .onnx file or an https URL
    #[arg(short, long)]
    pub model: Option<String>,

    /// Expected SHA-256 of the model weights
    #[arg(long, value_name = "HEX")]
    pub model_sha256: Option<String>,

    /// Inference threads
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// JSON configuration file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// File name of the result PNG
    #[arg(long, value_name = "NAME")]
    pub download_name: Option<String>,

    /// Use a custom model cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Log progress lines instead of drawing a progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Download the model weights into the cache and exit
    #[arg(long)]
    pub only_download: bool,

    /// Remove the cached model weights and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose, cli.log_format.into()).context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if cli.show_cache_dir {
        return show_cache_dir(&config);
    }
    if cli.clear_cache {
        return clear_cache(&config);
    }
    if cli.only_download {
        return download_only(&config).await;
    }

    let Some(input) = cli.input.as_deref() else {
        anyhow::bail!("An input image is required");
    };
    let output_dir = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));
    let processor = build_processor(&cli, config)?;

    info!(
        "Backend: {}, model: {}",
        processor.config().backend,
        processor.config().model.model_id
    );

    let start_time = Instant::now();
    let result = process_file(&processor, input, &output_dir).await;
    if let Err(e) = &result {
        error!("❌ {}: {:#}", input.display(), e);
    }
    info!("Finished in {:.2}s", start_time.elapsed().as_secs_f64());
    result
}

fn build_processor(cli: &Cli, config: DetourConfig) -> Result<DetourProcessor> {
    let show_progress = !cli.no_progress;
    let manager = ModelManager::new().with_download_progress(show_progress);
    let backend = create_backend_with(config.backend, manager);

    let reporter: Box<dyn ProgressReporter> = if show_progress {
        Box::new(IndicatifProgressReporter::new())
    } else {
        Box::new(ConsoleProgressReporter::new(cli.verbose > 0))
    };

    Ok(DetourProcessor::with_backend(config, backend)
        .context("Failed to create processor")?
        .with_reporter(reporter))
}

async fn process_file(processor: &DetourProcessor, input: &Path, output_dir: &Path) -> Result<()> {
    let source = SourceImage::from_path(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let summary = match processor.select(source).await? {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Ignored => anyhow::bail!("processor busy"),
    };

    let path = processor
        .save_download(output_dir)
        .await
        .context("Failed to save result")?;

    match summary.kind {
        FinishKind::Cropped {
            bounds,
            source_width,
            source_height,
        } => println!(
            "✅ {} → {} ({}x{} of {}x{}, {})",
            input.display(),
            path.display(),
            bounds.width(),
            bounds.height(),
            source_width,
            source_height,
            format_size(summary.result_bytes as u64)
        ),
        FinishKind::Transparent => {
            warn!("{}: image is entirely transparent", input.display());
            println!("⚠️  {} → {} (uncropped)", input.display(), path.display());
        },
    }
    Ok(())
}

fn show_cache_dir(config: &DetourConfig) -> Result<()> {
    let cache = ModelCache::new(config.model.cache_dir.as_deref())
        .context("Failed to access cache directory")?;

    println!("📁 Model cache directory:");
    println!("   Path: {}", cache.cache_dir().display());
    let source = if config.model.cache_dir.is_some() {
        "configuration".to_string()
    } else if std::env::var(CACHE_DIR_ENV).is_ok() {
        format!("{CACHE_DIR_ENV} environment variable")
    } else {
        "platform cache directory".to_string()
    };
    println!("   Source: {source}");

    let model_path = cache.model_path(&config.model.model_id);
    if cache.is_cached(&config.model.model_id) {
        let size = std::fs::metadata(&model_path).map(|m| m.len()).unwrap_or(0);
        println!("   Model: {} ({})", model_path.display(), format_size(size));
    } else {
        println!("   Model: {} (not downloaded)", config.model.model_id);
    }
    Ok(())
}

fn clear_cache(config: &DetourConfig) -> Result<()> {
    let cache = ModelCache::new(config.model.cache_dir.as_deref())
        .context("Failed to access cache directory")?;
    let model_id = &config.model.model_id;

    if cache.remove(model_id).context("Failed to remove cached model")? {
        println!("🗑️  Removed cached model '{model_id}'");
    } else {
        println!("💡 Model '{model_id}' is not cached");
    }
    println!("   Cache location: {}", cache.cache_dir().display());
    Ok(())
}

async fn download_only(config: &DetourConfig) -> Result<()> {
    if let Some(path) = &config.model.local_path {
        anyhow::bail!(
            "--only-download needs a model URL, but a local model is configured: {}",
            path.display()
        );
    }

    let cache = ModelCache::new(config.model.cache_dir.as_deref())
        .context("Failed to access cache directory")?;
    let downloader = ModelDownloader::new(cache)
        .context("Failed to create model downloader")?
        .with_progress(true);

    println!("📦 Fetching model '{}' from {}", config.model.model_id, config.model.url);
    let path = downloader
        .ensure_model(&config.model)
        .await
        .context("Failed to download model")?;
    println!("✅ Model available at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_input_required_unless_maintenance_flag() {
        assert!(Cli::try_parse_from(["imgralph"]).is_err());
        assert!(Cli::try_parse_from(["imgralph", "--show-cache-dir"]).is_ok());
        assert!(Cli::try_parse_from(["imgralph", "--only-download"]).is_ok());
    }

    #[test]
    fn test_backend_flag_parses() {
        let cli = Cli::try_parse_from(["imgralph", "a.png", "-b", "ort"]).unwrap();
        assert_eq!(cli.backend, Some(BackendType::Onnx));
        assert!(Cli::try_parse_from(["imgralph", "a.png", "-b", "cuda"]).is_err());
    }

    #[test]
    fn test_single_input_only() {
        let cli = Cli::try_parse_from(["imgralph", "cat.jpg", "-o", "out"]).unwrap();
        assert_eq!(cli.input, Some(PathBuf::from("cat.jpg")));
        assert_eq!(cli.output, Some(PathBuf::from("out")));
        assert!(Cli::try_parse_from(["imgralph", "cat.jpg", "dog.jpg"]).is_err());
    }
}
