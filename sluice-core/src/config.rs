//! Coordinator configuration
//!
//! Settings are loaded from environment variables with defaults suitable for
//! an interactive cache host.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Environment variable holding the coalescing window in milliseconds.
pub const ENV_COALESCE_WINDOW_MS: &str = "SLUICE_COALESCE_WINDOW_MS";

/// Environment variable holding the maximum concurrent evictions per flush.
pub const ENV_EVICTION_CONCURRENCY: &str = "SLUICE_EVICTION_CONCURRENCY";

/// Default coalescing window.
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(300);

/// Upper bound accepted for the coalescing window.
pub const MAX_COALESCE_WINDOW: Duration = Duration::from_secs(60);

/// Default number of evictions a flush runs at once.
pub const DEFAULT_EVICTION_CONCURRENCY: usize = 16;

/// Settings for the coalescing scheduler and the flush driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalesceConfig {
    /// Fixed delay between the first call of a burst and its flush.
    pub window: Duration,
    /// Maximum number of `evict` calls in flight during one flush.
    pub eviction_concurrency: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_COALESCE_WINDOW,
            eviction_concurrency: DEFAULT_EVICTION_CONCURRENCY,
        }
    }
}

impl CoalesceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the coalescing window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the eviction concurrency.
    pub fn with_eviction_concurrency(mut self, concurrency: usize) -> Self {
        self.eviction_concurrency = concurrency;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SLUICE_COALESCE_WINDOW_MS`: coalescing window in ms (default: 300)
    /// - `SLUICE_EVICTION_CONCURRENCY`: evictions in flight per flush (default: 16)
    ///
    /// Unset variables fall back to defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_COALESCE_WINDOW_MS) {
            let millis = parse_number::<u64>(ENV_COALESCE_WINDOW_MS, &raw)?;
            config.window = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup(ENV_EVICTION_CONCURRENCY) {
            config.eviction_concurrency = parse_number::<usize>(ENV_EVICTION_CONCURRENCY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window > MAX_COALESCE_WINDOW {
            return Err(ConfigError::InvalidValue {
                field: "window".to_string(),
                value: format!("{}ms", self.window.as_millis()),
                reason: format!("must be at most {}ms", MAX_COALESCE_WINDOW.as_millis()),
            });
        }

        if self.eviction_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "eviction_concurrency".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CoalesceConfig::default();
        assert_eq!(config.window, Duration::from_millis(300));
        assert_eq!(config.eviction_concurrency, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CoalesceConfig::new()
            .with_window(Duration::from_millis(50))
            .with_eviction_concurrency(2);
        assert_eq!(config.window, Duration::from_millis(50));
        assert_eq!(config.eviction_concurrency, 2);
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = CoalesceConfig::from_lookup(lookup(&[
            (ENV_COALESCE_WINDOW_MS, "120"),
            (ENV_EVICTION_CONCURRENCY, " 4 "),
        ]))
        .unwrap();
        assert_eq!(config.window, Duration::from_millis(120));
        assert_eq!(config.eviction_concurrency, 4);
    }

    #[test]
    fn test_from_lookup_unset_uses_defaults() {
        let config = CoalesceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoalesceConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = CoalesceConfig::from_lookup(lookup(&[(ENV_COALESCE_WINDOW_MS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == ENV_COALESCE_WINDOW_MS));
    }

    #[test]
    fn test_validate_bounds() {
        let too_long = CoalesceConfig::new().with_window(Duration::from_secs(61));
        assert!(too_long.validate().is_err());

        let no_concurrency = CoalesceConfig::new().with_eviction_concurrency(0);
        assert!(no_concurrency.validate().is_err());

        let zero_window = CoalesceConfig::new().with_window(Duration::ZERO);
        assert!(zero_window.validate().is_ok());
    }
}
