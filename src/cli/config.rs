//! Conversion of command line arguments into a `DetourConfig`

use crate::cli::main_impl::Cli;
use crate::config::{DetourConfig, ModelConfig};
use anyhow::{Context, Result};
use std::path::Path;

/// Builds the processor configuration from CLI arguments
///
/// Values from `--config` are loaded first; explicit flags override them.
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    pub(crate) fn from_cli(cli: &Cli) -> Result<DetourConfig> {
        let mut config = match &cli.config {
            Some(path) => DetourConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => DetourConfig::default(),
        };

        if let Some(backend) = cli.backend {
            config.backend = backend;
        }
        if let Some(threshold) = cli.threshold {
            config.crop.alpha_threshold = threshold;
        }
        if let Some(margin) = cli.margin {
            config.crop.margin = margin;
        }
        if let Some(threads) = cli.threads {
            config.session.num_threads = threads;
        }
        if let Some(name) = &cli.download_name {
            config.download_name.clone_from(name);
        }
        if let Some(model) = &cli.model {
            Self::apply_model_arg(&mut config.model, model);
        }
        if let Some(sha) = &cli.model_sha256 {
            config.model.sha256 = Some(sha.clone());
        }
        if let Some(dir) = &cli.cache_dir {
            config.model.cache_dir = Some(dir.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// `--model` takes either an https URL or a path to an `.onnx` file
    fn apply_model_arg(model: &mut ModelConfig, arg: &str) {
        if arg.starts_with("https://") || arg.starts_with("http://") {
            model.url = arg.to_string();
            model.local_path = None;
            if let Some(stem) = arg
                .rsplit('/')
                .next()
                .and_then(|name| Path::new(name).file_stem())
                .and_then(|stem| stem.to_str())
                .filter(|stem| !stem.is_empty())
            {
                model.model_id = stem.to_string();
            }
        } else {
            model.local_path = Some(arg.into());
        }
    }
}
