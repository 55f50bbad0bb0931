//! Tracing subscriber initialization for hosts embedding the coordinator.
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is left to the host. This helper covers the common case.

use sluice_core::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting the log output format.
pub const ENV_LOG_FORMAT: &str = "SLUICE_LOG_FORMAT";

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "sluice_core=info,sluice_coalesce=info,sluice_cache=info,warn";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                field: ENV_LOG_FORMAT.to_string(),
                value: other.to_string(),
                reason: "expected 'pretty' or 'json'".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Read `SLUICE_LOG_FORMAT`. Unset means pretty output.
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match std::env::var(ENV_LOG_FORMAT) {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self {
            format,
            ..Self::default()
        })
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.default_filter`. Fails if a
/// global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    installed.map_err(|e| ConfigError::InvalidValue {
        field: "tracing_subscriber".to_string(),
        value: "global".to_string(),
        reason: format!("failed to install subscriber: {}", e),
    })?;

    tracing::debug!(format = ?config.format, "Tracing initialized");
    Ok(())
}
