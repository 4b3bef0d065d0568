//! Tracing subscriber setup for the command line tool
//!
//! The library only emits `tracing` events and `log` records; installing a
//! subscriber is left to the binary. Verbosity scopes the level to this crate
//! and keeps dependencies (reqwest, tract, ort) at `warn` unless an explicit
//! filter is given.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Environment variable holding a full `EnvFilter` directive
pub const LOG_FILTER_ENV: &str = "IMGRALPH_LOG";

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Colored, human-readable lines
    Console,
    /// Plain lines without ANSI colors, for CI logs
    Compact,
    /// One JSON object per event, with span context
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Verbosity level: 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Full filter directive; overrides `verbosity` when set
    pub env_filter: Option<String>,
    /// Identifier attached to the start-up event for log correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Level used for this crate at the configured verbosity
    #[must_use]
    pub fn crate_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Filter directive handed to `EnvFilter`
    #[must_use]
    pub fn filter_directive(&self) -> String {
        match &self.env_filter {
            Some(filter) => filter.clone(),
            None => format!("warn,imgralph={}", self.crate_level()),
        }
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - The filter directive does not parse
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = EnvFilter::try_new(self.filter_directive())?;
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "🚀 imgralph session started");
        }
        Ok(())
    }
}

/// Initialize tracing with command line defaults
///
/// `IMGRALPH_LOG`, when set, replaces the verbosity-derived filter.
///
/// # Errors
/// - See [`TracingConfig::init`]
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<()> {
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Ok(filter) = std::env::var(LOG_FILTER_ENV) {
        config = config.with_env_filter(filter);
    }
    config.init()
}
