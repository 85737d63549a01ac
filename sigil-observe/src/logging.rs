//! Subscriber configuration and installation.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines (default for development).
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Configuration for the global subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directives used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
    /// Include the event target (module path) in each line.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,sigil_attribution=info".to_string(),
            format: LogFormat::Pretty,
            with_target: true,
        }
    }
}

/// Error type for logging initialization.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The filter directives could not be parsed.
    #[error("invalid log filter {directives:?}: {source}")]
    InvalidFilter {
        directives: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// A global subscriber is already installed.
    #[error("failed to set global subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing_subscriber::util::TryInitError),
}

impl LogConfig {
    /// Directives the filter is built from, preferring a non-empty `RUST_LOG`.
    fn directives(&self, env_override: Option<String>) -> String {
        match env_override {
            Some(value) if !value.trim().is_empty() => value,
            _ => self.filter.clone(),
        }
    }

    /// Build the event filter for this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ObserveError::InvalidFilter`] if the directives do not parse.
    pub fn build_filter(&self) -> Result<EnvFilter, ObserveError> {
        let env_value = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        parse_filter(self.directives(env_value))
    }
}

fn parse_filter(directives: String) -> Result<EnvFilter, ObserveError> {
    EnvFilter::try_new(&directives)
        .map_err(|source| ObserveError::InvalidFilter { directives, source })
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber has
/// already been set.
pub fn init_logging(config: &LogConfig) -> Result<(), ObserveError> {
    let filter = config.build_filter()?;

    let (pretty, json) = match config.format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_target(config.with_target)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_target(config.with_target)),
        ),
    };

    Registry::default()
        .with(filter)
        .with(pretty)
        .with(json)
        .try_init()?;

    tracing::debug!(format = ?config.format, "Logging initialized");
    Ok(())
}
