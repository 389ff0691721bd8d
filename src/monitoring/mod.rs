//! Monitoring module for qperf
//!
//! Provides:
//! - Rolling execution metrics and Prometheus export
//! - Usage threshold monitoring with deduplicated alerts
//! - Alert delivery collaborators (log, webhook)
//! - Text / JSON performance reports
//! - Structured logging with tracing

pub mod config;
pub mod metrics;
pub mod notify;
pub mod report;
pub mod thresholds;
pub mod tracing_config;

pub use config::{LogFormat, MonitoringConfig};
pub use metrics::{
    export_prometheus, ExecutionMetric, MetricsRecorder, MetricsSummary, OperationSummary, Outcome,
    REGISTRY,
};
pub use notify::{AlertNotifier, LogNotifier, WebhookNotifier};
pub use report::{ReportGenerator, ReportSnapshot};
pub use thresholds::{
    Severity, ThresholdMonitor, Trend, UsageAlert, UsageKind, UsageSample, UsageSource,
};
pub use tracing_config::{init_tracing, TracingGuard};
