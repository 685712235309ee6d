//! `tracing` subscriber setup for the worker tools.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Targets logged at the configured level. Dependencies (reqwest, hyper)
/// stay at `warn` unless `RUST_LOG` or a custom filter says otherwise.
const WORKSPACE_TARGETS: &[&str] = &[
    "agrimarket_common",
    "agrimarket_net",
    "agrimarket_sw",
    "sw_harness",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Print source file and line with every event.
    pub include_location: bool,
    /// Filter directives replacing the defaults, e.g. `agrimarket_sw=trace`.
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            include_location: false,
            filter: None,
        }
    }
}

impl LogConfig {
    /// Settings for `--verbose` and `--json-logs`.
    pub fn from_flags(verbose: bool, json: bool) -> Self {
        Self {
            level: if verbose { Level::DEBUG } else { Level::INFO },
            format: if json { LogFormat::Json } else { LogFormat::Pretty },
            include_location: verbose,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// `warn` for everything, the configured level for workspace crates.
    pub fn default_directives(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        std::iter::once("warn".to_string())
            .chain(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn env_filter(&self) -> EnvFilter {
        let custom = match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).ok(),
            None => EnvFilter::try_from_default_env().ok(),
        };
        custom.unwrap_or_else(|| EnvFilter::new(self.default_directives()))
    }
}

/// Install the global subscriber. Returns `false` if one was already set,
/// which happens when several tests share a process.
pub fn init_logging(config: LogConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init(),
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
    };
    installed.is_ok()
}
