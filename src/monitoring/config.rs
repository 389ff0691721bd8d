//! Logging configuration
//!
//! Loads from environment variables:
//! - MONITORING_ENABLED: Enable/disable the tracing subscriber (true/false)
//! - RUST_LOG: Tracing level (debug, info, warn, error)
//! - LOG_FORMAT: Console output format (json or text)
//! - LOG_DIR: Directory for log files (default: ~/.qperf/logs)
//! - LOG_RETENTION_DAYS: How many days of rolled files to keep (default: 7)
//! - LOG_TO_FILE: Enable the daily rolling file (default: false)
//! - LOG_TO_CONSOLE: Enable console output (default: true)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::env_or;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable or disable the subscriber
    pub enabled: bool,

    /// Log level used when RUST_LOG is absent
    pub log_level: String,

    /// Console log format
    pub log_format: LogFormat,

    /// Directory for log files
    pub log_dir: PathBuf,

    /// How many days to retain logs
    pub log_retention_days: u32,

    /// Enable file logging
    pub enable_file_logging: bool,

    /// Enable console logging
    pub enable_console_logging: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_dir: Self::default_log_dir(),
            log_retention_days: 7,
            enable_file_logging: false,
            enable_console_logging: true,
        }
    }
}

impl MonitoringConfig {
    /// Load configuration from environment variables.
    /// Call `dotenvy::dotenv()` first if `.env` should apply.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("MONITORING_ENABLED", defaults.enabled),
            log_level: env_or("RUST_LOG", defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            log_dir: env_or("LOG_DIR", defaults.log_dir),
            log_retention_days: env_or("LOG_RETENTION_DAYS", defaults.log_retention_days),
            enable_file_logging: env_or("LOG_TO_FILE", defaults.enable_file_logging),
            enable_console_logging: env_or("LOG_TO_CONSOLE", defaults.enable_console_logging),
        }
    }

    /// Get default log directory: ~/.qperf/logs
    pub fn default_log_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".qperf").join("logs")
    }

    /// Ensure log directory exists
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if !self.log_dir.exists() {
            std::fs::create_dir_all(&self.log_dir)?;
            tracing::info!(path = %self.log_dir.display(), "Created log directory");
        }

        Ok(())
    }
}
