//! Configuration management for QueryPulse
//!
//! Provides:
//! - TOML file loading with per-field defaults
//! - `QUERYPULSE_*` environment overrides
//! - Validation before any service is built from it

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub executor: ExecutorConfig,
    pub metrics: MetricsConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub logging: LoggingConfig,
}

/// Query executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Executions slower than this produce a slow-query warning
    pub slow_query_threshold_ms: f64,
    /// Executions faster than this are not worth caching
    pub min_cacheable_time_ms: f64,
    /// Collections larger than this are never cached
    pub max_cacheable_elements: usize,
    /// Refresh in background once remaining TTL drops below this fraction
    pub refresh_fraction: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 50.0,
            min_cacheable_time_ms: 10.0,
            max_cacheable_elements: 1000,
            refresh_fraction: 0.2,
        }
    }
}

/// Metric retention configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub max_samples_per_query: usize,
    pub retention_secs: u64,
    pub prune_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples_per_query: 1000,
            retention_secs: 24 * 60 * 60,
            prune_interval_secs: 60 * 60,
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }
}

/// Result cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub sweep_interval_secs: u64,
    pub ttl: TtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            ttl: TtlConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// TTL table used when the caller does not pass an explicit TTL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub user_ms: u64,
    pub static_ms: u64,
    pub api_ms: u64,
    pub content_ms: u64,
    pub subscription_ms: u64,
    pub default_ms: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            user_ms: 300_000,
            static_ms: 86_400_000,
            api_ms: 600_000,
            content_ms: 300_000,
            subscription_ms: 1_800_000,
            default_ms: 300_000,
        }
    }
}

/// Health gate thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// p95 above this is an SLA violation
    pub sla_p95_ms: f64,
    pub degraded_p95_ms: f64,
    /// Fraction of slow samples (0..=1) above which the service is degraded
    pub degraded_slow_fraction: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sla_p95_ms: 50.0,
            degraded_p95_ms: 35.0,
            degraded_slow_fraction: 0.10,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub level: String,
    /// Module-specific log levels
    pub module_levels: HashMap<String, String>,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = HashMap::new();
        module_levels.insert("querypulse::executor".to_string(), "info".to_string());
        module_levels.insert("querypulse::cache".to_string(), "info".to_string());

        Self {
            level: "info".to_string(),
            module_levels,
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = env::var("QUERYPULSE_SLOW_QUERY_MS") {
            self.executor.slow_query_threshold_ms = parse_env("QUERYPULSE_SLOW_QUERY_MS", &value)?;
        }
        if let Ok(value) = env::var("QUERYPULSE_SLA_P95_MS") {
            self.health.sla_p95_ms = parse_env("QUERYPULSE_SLA_P95_MS", &value)?;
        }
        if let Ok(value) = env::var("QUERYPULSE_MAX_SAMPLES") {
            self.metrics.max_samples_per_query = parse_env("QUERYPULSE_MAX_SAMPLES", &value)?;
        }
        if let Ok(level) = env::var("QUERYPULSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject configurations the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.metrics.max_samples_per_query == 0 {
            return Err(Error::Config("metrics.max_samples_per_query must be > 0".into()));
        }
        if self.metrics.retention_secs == 0 {
            return Err(Error::Config("metrics.retention_secs must be > 0".into()));
        }
        if self.executor.max_cacheable_elements == 0 {
            return Err(Error::Config("executor.max_cacheable_elements must be > 0".into()));
        }
        if !(self.executor.refresh_fraction > 0.0 && self.executor.refresh_fraction < 1.0) {
            return Err(Error::Config(format!(
                "executor.refresh_fraction must be in (0, 1), got {}",
                self.executor.refresh_fraction
            )));
        }
        if self.executor.slow_query_threshold_ms < 0.0 || self.executor.min_cacheable_time_ms < 0.0 {
            return Err(Error::Config("executor thresholds must be non-negative".into()));
        }
        if self.health.degraded_p95_ms > self.health.sla_p95_ms {
            return Err(Error::Config(format!(
                "health.degraded_p95_ms ({}) must not exceed health.sla_p95_ms ({})",
                self.health.degraded_p95_ms, self.health.sla_p95_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.health.degraded_slow_fraction) {
            return Err(Error::Config("health.degraded_slow_fraction must be in [0, 1]".into()));
        }
        let ttl = &self.cache.ttl;
        if [ttl.user_ms, ttl.static_ms, ttl.api_ms, ttl.content_ms, ttl.subscription_ms, ttl.default_ms]
            .contains(&0)
        {
            return Err(Error::Config("cache.ttl entries must be > 0".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.executor.slow_query_threshold_ms, 50.0);
        assert_eq!(config.metrics.max_samples_per_query, 1000);
        assert_eq!(config.health.degraded_p95_ms, 35.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [executor]
            slow_query_threshold_ms = 75.0

            [cache.ttl]
            user_ms = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.executor.slow_query_threshold_ms, 75.0);
        assert_eq!(config.executor.min_cacheable_time_ms, 10.0);
        assert_eq!(config.cache.ttl.user_ms, 1000);
        assert_eq!(config.cache.ttl.static_ms, 86_400_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[health]\nsla_p95_ms = 80.0\ndegraded_p95_ms = 60.0").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.health.sla_p95_ms, 80.0);
        assert_eq!(config.health.degraded_p95_ms, 60.0);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::load("/nonexistent/querypulse.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.executor.refresh_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.health.degraded_p95_ms = 60.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.metrics.max_samples_per_query = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.ttl.api_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_preserves_config() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
