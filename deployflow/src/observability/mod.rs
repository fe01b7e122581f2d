//! Logging setup and timing helpers.
//!
//! Everything in the crate logs through `tracing` with structured fields.
//! Binaries embedding deployflow call [`init_tracing`] once at startup; the
//! filter comes from `RUST_LOG` and falls back to the configured default.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;
use tracing_subscriber::{fmt as subscriber_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::errors::ConfigError;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub default_filter: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
    /// Include the event target.
    #[serde(default = "default_true")]
    pub include_target: bool,
}

fn default_filter() -> String {
    "deployflow=info".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_filter: default_filter(),
            format: LogFormat::default(),
            include_target: true,
        }
    }
}

impl TracingConfig {
    /// Sets the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the fallback filter.
    #[must_use]
    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = filter.into();
        self
    }

    fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_filter)
                .map_err(|e| ConfigError::new("default_filter", e.to_string())),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn try_init_tracing(config: &TracingConfig) -> Result<(), ConfigError> {
    let filter = config.env_filter()?;
    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                subscriber_fmt::layer()
                    .json()
                    .with_target(config.include_target)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(subscriber_fmt::layer().with_target(config.include_target))
            .try_init(),
    };
    installed.map_err(|e| ConfigError::new("tracing", e.to_string()))
}

/// Installs the global tracing subscriber, ignoring a second installation.
pub fn init_tracing(config: &TracingConfig) {
    if let Err(e) = try_init_tracing(config) {
        tracing::debug!(error = %e, "Tracing subscriber not installed");
    }
}

/// Measures how long a stage or phase took, on the tokio clock.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts timing `name`.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Milliseconds since start.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// The timed name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the timer and returns the elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_span_timer_uses_tokio_clock() {
        let timer = SpanTimer::start("deploy");
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(timer.name(), "deploy");
        assert!((timer.finish() - 1500.0).abs() < 1.0);
    }

    #[test]
    fn test_tracing_config_from_json() {
        let config: TracingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_filter, "deployflow=info");
        assert!(config.include_target);
    }

    #[test]
    fn test_bad_filter_rejected() {
        let config = TracingConfig::default().with_default_filter("deployflow=notalevel");
        if std::env::var("RUST_LOG").is_err() {
            assert!(config.env_filter().is_err());
        }
    }

    #[test]
    fn test_second_init_is_harmless() {
        let config = TracingConfig::default().with_format(LogFormat::Json);
        init_tracing(&config);
        init_tracing(&config);
    }
}
