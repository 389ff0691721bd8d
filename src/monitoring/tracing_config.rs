//! Structured logging with tracing
//!
//! Sets up:
//! - Console logging (text or JSON)
//! - Optional file logging with daily rotation and retention (always JSON)
//! - Level filtering from RUST_LOG, falling back to the configured level

use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use super::config::{LogFormat, MonitoringConfig};

/// Keeps the non-blocking file writer alive. Dropping it stops file logging.
pub struct TracingGuard {
    _file: Option<WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(config: &MonitoringConfig) -> std::io::Result<TracingGuard> {
    if !config.enabled {
        return Ok(TracingGuard { _file: None });
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console_logging {
        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true);
        match config.log_format {
            LogFormat::Json => layers.push(console.json().boxed()),
            LogFormat::Text => layers.push(console.boxed()),
        }
    }

    let mut file_guard = None;
    if config.enable_file_logging {
        config.ensure_log_dir()?;
        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("qperf")
            .filename_suffix("log")
            .max_log_files(config.log_retention_days.max(1) as usize)
            .build(&config.log_dir)
            .map_err(std::io::Error::other)?;
        let (non_blocking_file, guard) = non_blocking(file_appender);
        layers.push(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false) // No ANSI codes in files
                .json()
                .boxed(),
        );
        file_guard = Some(guard);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init();

    Ok(TracingGuard { _file: file_guard })
}
