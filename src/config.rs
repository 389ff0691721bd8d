// src/config.rs
// Configuration surface for the query executor and threshold monitor
//
// Loads from environment variables (after reading .env):
// - QPERF_SLOW_QUERY_MS, QPERF_CACHE_ENABLED, QPERF_DEFAULT_TTL_SECS,
//   QPERF_MAX_CACHE_SIZE, QPERF_ENABLE_LOGGING, QPERF_METRICS_RETENTION
// - QPERF_STORAGE_WARN / _CRIT, QPERF_BANDWIDTH_WARN / _CRIT,
//   QPERF_API_WARN / _CRIT, QPERF_SAMPLE_INTERVAL_SECS, QPERF_ALERT_WEBHOOK_URL

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{PerfError, PerfResult};

/// Executor, cache and recorder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfConfig {
    /// Executions slower than this are flagged (milliseconds)
    pub slow_query_threshold_ms: f64,
    /// Master switch for cache-aside lookups
    pub cache_enabled: bool,
    /// TTL used when a call supplies a cache key but no TTL
    pub default_ttl_secs: u64,
    /// Maximum number of cache entries
    pub max_cache_size: usize,
    /// Per-call debug/warn logging from the executor
    pub enable_logging: bool,
    /// Number of execution records kept in the rolling window
    pub metrics_retention: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000.0,
            cache_enabled: true,
            default_ttl_secs: 300,
            max_cache_size: 1000,
            enable_logging: true,
            metrics_retention: 1000,
        }
    }
}

impl PerfConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> PerfResult<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            slow_query_threshold_ms: env_or("QPERF_SLOW_QUERY_MS", defaults.slow_query_threshold_ms),
            cache_enabled: env_or("QPERF_CACHE_ENABLED", defaults.cache_enabled),
            default_ttl_secs: env_or("QPERF_DEFAULT_TTL_SECS", defaults.default_ttl_secs),
            max_cache_size: env_or("QPERF_MAX_CACHE_SIZE", defaults.max_cache_size),
            enable_logging: env_or("QPERF_ENABLE_LOGGING", defaults.enable_logging),
            metrics_retention: env_or("QPERF_METRICS_RETENTION", defaults.metrics_retention),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the layer misbehave. Nothing is clamped.
    pub fn validate(&self) -> PerfResult<()> {
        if !self.slow_query_threshold_ms.is_finite() || self.slow_query_threshold_ms < 0.0 {
            return Err(PerfError::invalid(
                "slow_query_threshold_ms",
                format!("must be a non-negative number, got {}", self.slow_query_threshold_ms),
            ));
        }
        if self.default_ttl_secs == 0 {
            return Err(PerfError::invalid("default_ttl_secs", "must be greater than zero"));
        }
        if self.max_cache_size == 0 {
            return Err(PerfError::invalid("max_cache_size", "must be greater than zero"));
        }
        if self.metrics_retention == 0 {
            return Err(PerfError::invalid("metrics_retention", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Warning / critical pair for one usage kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdPair {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    fn validate(&self, field: &str) -> PerfResult<()> {
        for (label, value) in [("warning", self.warning), ("critical", self.critical)] {
            if !value.is_finite() || value < 0.0 {
                return Err(PerfError::invalid(
                    field,
                    format!("{} threshold must be a non-negative number, got {}", label, value),
                ));
            }
        }
        if self.warning > self.critical {
            return Err(PerfError::invalid(
                field,
                format!(
                    "warning threshold {} exceeds critical threshold {}",
                    self.warning, self.critical
                ),
            ));
        }
        Ok(())
    }
}

/// Usage thresholds and sampling settings for the threshold monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Database storage in MB
    pub storage: ThresholdPair,
    /// Egress bandwidth in MB
    pub bandwidth: ThresholdPair,
    /// API requests per billing period
    pub api_requests: ThresholdPair,
    /// Interval between periodic samples
    pub sample_interval_secs: u64,
    /// Optional webhook receiving alert JSON
    pub webhook_url: Option<String>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            storage: ThresholdPair::new(400.0, 475.0),
            bandwidth: ThresholdPair::new(1600.0, 1900.0),
            api_requests: ThresholdPair::new(40_000.0, 47_500.0),
            sample_interval_secs: 300,
            webhook_url: None,
        }
    }
}

impl ThresholdConfig {
    pub fn from_env() -> PerfResult<Self> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let config = Self {
            storage: ThresholdPair::new(
                env_or("QPERF_STORAGE_WARN", d.storage.warning),
                env_or("QPERF_STORAGE_CRIT", d.storage.critical),
            ),
            bandwidth: ThresholdPair::new(
                env_or("QPERF_BANDWIDTH_WARN", d.bandwidth.warning),
                env_or("QPERF_BANDWIDTH_CRIT", d.bandwidth.critical),
            ),
            api_requests: ThresholdPair::new(
                env_or("QPERF_API_WARN", d.api_requests.warning),
                env_or("QPERF_API_CRIT", d.api_requests.critical),
            ),
            sample_interval_secs: env_or("QPERF_SAMPLE_INTERVAL_SECS", d.sample_interval_secs),
            webhook_url: env::var("QPERF_ALERT_WEBHOOK_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PerfResult<()> {
        self.storage.validate("storage")?;
        self.bandwidth.validate("bandwidth")?;
        self.api_requests.validate("api_requests")?;
        if self.sample_interval_secs == 0 {
            return Err(PerfError::invalid("sample_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

/// Parse an env var, falling back to `default` when unset or unparsable
pub(crate) fn env_or<T: FromStr + std::fmt::Debug>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(env_var = %var, value = %raw, fallback = ?default, "Unparsable config value; using default");
                default
            }
        },
        Err(_) => default,
    }
}
