// File: src/monitoring/report.rs
// Human-readable performance report
//
// Read-only view over the recorder, cache and threshold monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::cache::{CacheStats, TtlCache};
use crate::error::PerfResult;
use crate::monitoring::metrics::{ExecutionMetric, MetricsRecorder, MetricsSummary};
use crate::monitoring::thresholds::{ThresholdMonitor, Trend, UsageAlert, UsageKind, UsageSample};

/// Slow operations listed in a report
const MAX_SLOW_LISTED: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendEntry {
    pub kind: UsageKind,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub generated_at: DateTime<Utc>,
    pub summary: MetricsSummary,
    pub cache: Option<CacheStats>,
    pub unresolved_alerts: Vec<UsageAlert>,
    pub trends: Vec<TrendEntry>,
    pub latest_usage: Option<UsageSample>,
    pub slow_operations: Vec<ExecutionMetric>,
}

pub struct ReportGenerator {
    recorder: Arc<MetricsRecorder>,
    monitor: Arc<ThresholdMonitor>,
    cache: Option<Arc<TtlCache<Value>>>,
}

impl ReportGenerator {
    pub fn new(recorder: Arc<MetricsRecorder>, monitor: Arc<ThresholdMonitor>) -> Self {
        Self {
            recorder,
            monitor,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<TtlCache<Value>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn snapshot(&self) -> ReportSnapshot {
        let mut slow = self.recorder.slow_operations(None);
        slow.sort_by(|a, b| b.latency_ms.total_cmp(&a.latency_ms));
        slow.truncate(MAX_SLOW_LISTED);

        ReportSnapshot {
            generated_at: Utc::now(),
            summary: self.recorder.summary(),
            cache: self.cache.as_ref().map(|c| c.stats()),
            unresolved_alerts: self.monitor.unresolved_alerts(),
            trends: self
                .monitor
                .trends()
                .into_iter()
                .map(|(kind, trend)| TrendEntry { kind, trend })
                .collect(),
            latest_usage: self.monitor.latest_sample(),
            slow_operations: slow,
        }
    }

    pub fn to_json(&self) -> PerfResult<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn generate(&self) -> String {
        render(&self.snapshot(), self.recorder.slow_threshold_ms())
    }
}

fn render(snapshot: &ReportSnapshot, slow_threshold_ms: f64) -> String {
    let s = &snapshot.summary;
    let mut out = String::new();

    // write! into a String cannot fail
    let _ = writeln!(out, "=== Query Performance Report ===");
    let _ = writeln!(out, "Generated: {}", snapshot.generated_at.to_rfc3339());
    let _ = writeln!(out);

    let _ = writeln!(out, "-- Queries --");
    let _ = writeln!(out, "Total:            {}", s.total_count);
    let _ = writeln!(
        out,
        "Executed/Cached/Errors: {}/{}/{}",
        s.executed_count, s.cached_count, s.error_count
    );
    let _ = writeln!(out, "Average latency:  {:.2} ms", s.average_latency_ms);
    let _ = writeln!(out, "  executed avg:   {:.2} ms", s.average_executed_latency_ms);
    let _ = writeln!(out, "  cached avg:     {:.2} ms", s.average_cached_latency_ms);
    let _ = writeln!(out, "Cache hit rate:   {:.1}%", s.cache_hit_rate * 100.0);
    let _ = writeln!(out, "Slow (> {:.0} ms): {}", slow_threshold_ms, s.slow_count);

    if let Some(cache) = &snapshot.cache {
        let _ = writeln!(out);
        let _ = writeln!(out, "-- Cache --");
        let _ = writeln!(out, "Entries:          {}/{}", cache.item_count, cache.capacity);
        let _ = writeln!(out, "Evictions:        {}", cache.evictions);
        let _ = writeln!(out, "Expirations:      {}", cache.expirations);
    }

    if !snapshot.slow_operations.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "-- Slowest operations --");
        for m in &snapshot.slow_operations {
            let _ = writeln!(
                out,
                "{:<30} {:>10.2} ms  [{}]",
                m.operation_id, m.latency_ms, m.outcome
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "-- Usage alerts --");
    if snapshot.unresolved_alerts.is_empty() {
        let _ = writeln!(out, "None");
    } else {
        for alert in &snapshot.unresolved_alerts {
            let _ = writeln!(
                out,
                "[{}] {}: {:.1} (threshold {:.1}) since {}",
                alert.severity.as_str().to_uppercase(),
                alert.kind,
                alert.current_value,
                alert.threshold,
                alert.created_at.to_rfc3339()
            );
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "-- Usage trends --");
    for entry in &snapshot.trends {
        let current = snapshot
            .latest_usage
            .map(|u| format!("{:.1}", u.get(entry.kind)))
            .unwrap_or_else(|| "n/a".to_string());
        let _ = writeln!(out, "{:<14} {:<11} current {}", entry.kind, entry.trend, current);
    }

    out
}
