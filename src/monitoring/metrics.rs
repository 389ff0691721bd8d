// src/monitoring/metrics.rs
// Rolling execution log + Prometheus counters

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{PerfError, PerfResult};

// Global Prometheus registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn service_and_env() -> (String, String) {
    let service = std::env::var("APP_SERVICE").unwrap_or_else(|_| env!("CARGO_PKG_NAME").to_string());
    let env_name = std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());
    (service, env_name)
}

pub static QUERY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let (service, env_name) = service_and_env();
    let opts = Opts::new("qperf_query_total", "Query executor invocations by outcome")
        .const_label("service", service)
        .const_label("env", env_name);
    let cv = IntCounterVec::new(opts, &["outcome"]).expect("valid metric definition");
    REGISTRY.register(Box::new(cv.clone())).ok();
    cv
});

pub static QUERY_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    let (service, env_name) = service_and_env();
    let buckets = vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];
    let mut opts = HistogramOpts::new("qperf_query_latency_ms", "Query latency in milliseconds")
        .buckets(buckets);
    opts.common_opts = opts.common_opts.const_label("service", service).const_label("env", env_name);
    let h = Histogram::with_opts(opts).expect("valid metric definition");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static CACHE_EVICTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("qperf_cache_evictions_total", "Cache entries evicted at capacity")
        .expect("valid metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static USAGE_ALERTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("qperf_usage_alerts_total", "Usage alerts raised by kind and severity");
    let cv = IntCounterVec::new(opts, &["kind", "severity"]).expect("valid metric definition");
    REGISTRY.register(Box::new(cv.clone())).ok();
    cv
});

/// Render all registered metrics in the Prometheus text format
pub fn export_prometheus() -> String {
    // Touch lazies so they show up even before first use
    Lazy::force(&QUERY_TOTAL);
    Lazy::force(&QUERY_LATENCY_MS);
    Lazy::force(&CACHE_EVICTIONS_TOTAL);
    Lazy::force(&USAGE_ALERTS_TOTAL);

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// How a single executor call was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Executed,
    Cached,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Executed => "executed",
            Outcome::Cached => "cached",
            Outcome::Error => "error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetric {
    pub operation_id: String,
    pub outcome: Outcome,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub result_count: Option<usize>,
}

/// Aggregate over the retained window.
///
/// `average_latency_ms` mixes cache-lookup and execution costs; the
/// per-outcome averages keep them apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_count: usize,
    pub executed_count: usize,
    pub cached_count: usize,
    pub error_count: usize,
    pub average_latency_ms: f64,
    pub average_executed_latency_ms: f64,
    pub average_cached_latency_ms: f64,
    pub cache_hit_rate: f64,
    pub slow_count: usize,
}

/// Latency profile for one operation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub operation_id: String,
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
}

/// Bounded, append-only log of executor calls
pub struct MetricsRecorder {
    records: RwLock<VecDeque<ExecutionMetric>>,
    retention: usize,
    slow_threshold_ms: f64,
}

impl MetricsRecorder {
    pub fn new(retention: usize, slow_threshold_ms: f64) -> PerfResult<Self> {
        if retention == 0 {
            return Err(PerfError::invalid("metrics_retention", "must be greater than zero"));
        }
        if !slow_threshold_ms.is_finite() || slow_threshold_ms < 0.0 {
            return Err(PerfError::invalid(
                "slow_query_threshold_ms",
                format!("must be a non-negative number, got {}", slow_threshold_ms),
            ));
        }
        Ok(Self {
            records: RwLock::new(VecDeque::with_capacity(retention.min(4096))),
            retention,
            slow_threshold_ms,
        })
    }

    /// Append a record, dropping the oldest once the window is full
    pub fn record(
        &self,
        operation_id: &str,
        outcome: Outcome,
        latency_ms: f64,
        result_count: Option<usize>,
    ) -> ExecutionMetric {
        let metric = ExecutionMetric {
            operation_id: operation_id.to_string(),
            outcome,
            latency_ms: latency_ms.max(0.0),
            timestamp: Utc::now(),
            result_count,
        };

        QUERY_TOTAL.with_label_values(&[outcome.as_str()]).inc();
        QUERY_LATENCY_MS.observe(metric.latency_ms);

        let mut records = self.records.write();
        records.push_back(metric.clone());
        while records.len() > self.retention {
            records.pop_front();
        }
        metric
    }

    /// Records slower than `threshold_ms` (the configured slow threshold when `None`)
    pub fn slow_operations(&self, threshold_ms: Option<f64>) -> Vec<ExecutionMetric> {
        let threshold = threshold_ms.unwrap_or(self.slow_threshold_ms);
        self.records
            .read()
            .iter()
            .filter(|m| m.latency_ms > threshold)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let records = self.records.read();
        let total_count = records.len();
        if total_count == 0 {
            return MetricsSummary::default();
        }

        let mut summary = MetricsSummary {
            total_count,
            ..MetricsSummary::default()
        };
        let mut total_ms = 0.0;
        let mut executed_ms = 0.0;
        let mut cached_ms = 0.0;

        for m in records.iter() {
            total_ms += m.latency_ms;
            match m.outcome {
                Outcome::Executed => {
                    summary.executed_count += 1;
                    executed_ms += m.latency_ms;
                }
                Outcome::Cached => {
                    summary.cached_count += 1;
                    cached_ms += m.latency_ms;
                }
                Outcome::Error => summary.error_count += 1,
            }
            if m.latency_ms > self.slow_threshold_ms {
                summary.slow_count += 1;
            }
        }

        summary.average_latency_ms = total_ms / total_count as f64;
        summary.average_executed_latency_ms = mean(executed_ms, summary.executed_count);
        summary.average_cached_latency_ms = mean(cached_ms, summary.cached_count);
        summary.cache_hit_rate = summary.cached_count as f64 / total_count as f64;
        summary
    }

    /// Latency profile for a single operation id
    pub fn operation_summary(&self, operation_id: &str) -> Option<OperationSummary> {
        let records = self.records.read();
        let samples: Vec<&ExecutionMetric> = records
            .iter()
            .filter(|m| m.operation_id == operation_id)
            .collect();
        if samples.is_empty() {
            return None;
        }

        let mut durations: Vec<f64> = samples.iter().map(|m| m.latency_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));
        let count = samples.len();
        let errors = samples.iter().filter(|m| m.outcome == Outcome::Error).count();
        let cached = samples.iter().filter(|m| m.outcome == Outcome::Cached).count();

        Some(OperationSummary {
            operation_id: operation_id.to_string(),
            count,
            min_ms: durations[0],
            max_ms: durations[count - 1],
            avg_ms: durations.iter().sum::<f64>() / count as f64,
            p50_ms: percentile(&durations, 50.0),
            p95_ms: percentile(&durations, 95.0),
            p99_ms: percentile(&durations, 99.0),
            error_rate: errors as f64 / count as f64,
            cache_hit_rate: cached as f64 / count as f64,
        })
    }

    /// Distinct operation ids in first-seen order
    pub fn operations(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for m in self.records.read().iter() {
            if !seen.contains(&m.operation_id) {
                seen.push(m.operation_id.clone());
            }
        }
        seen
    }

    /// Most recent `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<ExecutionMetric> {
        let records = self.records.read();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.records.write().clear();
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    pub fn slow_threshold_ms(&self) -> f64 {
        self.slow_threshold_ms
    }
}

fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let index = ((pct / 100.0) * (sorted.len() - 1) as f64) as usize;
    sorted[index]
}
