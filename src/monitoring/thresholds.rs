// File: src/monitoring/thresholds.rs
// Usage threshold monitor
//
// Compares usage samples (storage, bandwidth, API requests) against
// warning/critical limits and keeps at most one unresolved alert per
// (kind, severity). A repeated breach refreshes that alert in place.
// Also classifies the recent trend of each kind from sample history.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ThresholdConfig, ThresholdPair};
use crate::error::PerfResult;
use crate::monitoring::metrics::USAGE_ALERTS_TOTAL;
use crate::monitoring::notify::{self, AlertNotifier};

/// Samples per trend window
const TREND_WINDOW: usize = 6;
/// Percent change that counts as a trend
const TREND_THRESHOLD_PCT: f64 = 5.0;
/// How far back sample history reaches
const HISTORY_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    Storage,
    Bandwidth,
    ApiRequests,
}

impl UsageKind {
    pub const ALL: [UsageKind; 3] = [UsageKind::Storage, UsageKind::Bandwidth, UsageKind::ApiRequests];

    pub fn as_str(&self) -> &'static str {
        match self {
            UsageKind::Storage => "storage",
            UsageKind::Bandwidth => "bandwidth",
            UsageKind::ApiRequests => "api_requests",
        }
    }
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Trend::Increasing => "increasing",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
        })
    }
}

/// One reading from the metering backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub storage: f64,
    pub bandwidth: f64,
    pub api_requests: f64,
}

impl UsageSample {
    pub fn new(storage: f64, bandwidth: f64, api_requests: f64) -> Self {
        Self {
            storage,
            bandwidth,
            api_requests,
        }
    }

    pub fn get(&self, kind: UsageKind) -> f64 {
        match kind {
            UsageKind::Storage => self.storage,
            UsageKind::Bandwidth => self.bandwidth,
            UsageKind::ApiRequests => self.api_requests,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageAlert {
    pub id: Uuid,
    pub kind: UsageKind,
    pub severity: Severity,
    pub current_value: f64,
    pub threshold: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

impl UsageAlert {
    pub fn new(kind: UsageKind, severity: Severity, current_value: f64, threshold: f64) -> Self {
        Self::new_at(kind, severity, current_value, threshold, Utc::now())
    }

    fn new_at(
        kind: UsageKind,
        severity: Severity,
        current_value: f64,
        threshold: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            current_value,
            threshold,
            message: alert_message(kind, severity, current_value, threshold),
            created_at: at,
            resolved: false,
        }
    }

    fn refresh(&mut self, current_value: f64, at: DateTime<Utc>) {
        self.current_value = current_value;
        self.created_at = at;
        self.message = alert_message(self.kind, self.severity, current_value, self.threshold);
    }
}

fn alert_message(kind: UsageKind, severity: Severity, value: f64, threshold: f64) -> String {
    let pct = if threshold > 0.0 { value / threshold * 100.0 } else { 100.0 };
    format!(
        "{} usage {} threshold reached: {:.1} >= {:.1} ({:.0}% of limit)",
        kind, severity, value, threshold, pct
    )
}

/// Source of usage samples (storage metering, billing API, ...)
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn sample_usage(&self) -> PerfResult<UsageSample>;
}

struct MonitorState {
    alerts: Vec<UsageAlert>,
    history: VecDeque<(DateTime<Utc>, UsageSample)>,
}

pub struct ThresholdMonitor {
    config: ThresholdConfig,
    state: Mutex<MonitorState>,
    notifier: Option<Arc<dyn AlertNotifier>>,
}

impl ThresholdMonitor {
    pub fn new(config: ThresholdConfig) -> PerfResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(MonitorState {
                alerts: Vec::new(),
                history: VecDeque::new(),
            }),
            notifier: None,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AlertNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    pub fn thresholds(&self, kind: UsageKind) -> ThresholdPair {
        match kind {
            UsageKind::Storage => self.config.storage,
            UsageKind::Bandwidth => self.config.bandwidth,
            UsageKind::ApiRequests => self.config.api_requests,
        }
    }

    /// Evaluate a sample taken now. Returns alerts raised or refreshed.
    pub fn sample(&self, usage: UsageSample) -> Vec<UsageAlert> {
        self.sample_at(usage, Utc::now())
    }

    /// Evaluate a sample taken at `at`
    pub fn sample_at(&self, usage: UsageSample, at: DateTime<Utc>) -> Vec<UsageAlert> {
        let mut touched = Vec::new();
        let mut raised = Vec::new();

        {
            let mut state = self.state.lock();

            state.history.push_back((at, usage));
            let cutoff = at - ChronoDuration::hours(HISTORY_HOURS);
            while state.history.front().is_some_and(|(ts, _)| *ts < cutoff) {
                state.history.pop_front();
            }
            // Resolved alerts age out with the history window
            state.alerts.retain(|a| !a.resolved || a.created_at >= cutoff);

            for kind in UsageKind::ALL {
                let value = usage.get(kind);
                let pair = self.thresholds(kind);
                // Critical first: a critical breach never also raises a warning
                let breach = if value >= pair.critical {
                    Some((Severity::Critical, pair.critical))
                } else if value >= pair.warning {
                    Some((Severity::Warning, pair.warning))
                } else {
                    None
                };

                let Some((severity, threshold)) = breach else {
                    continue;
                };

                let existing = state
                    .alerts
                    .iter_mut()
                    .find(|a| !a.resolved && a.kind == kind && a.severity == severity);

                match existing {
                    Some(alert) => {
                        alert.refresh(value, at);
                        debug!(kind = %kind, severity = %severity, value, "Refreshed unresolved usage alert");
                        touched.push(alert.clone());
                    }
                    None => {
                        let alert = UsageAlert::new_at(kind, severity, value, threshold, at);
                        USAGE_ALERTS_TOTAL
                            .with_label_values(&[kind.as_str(), severity.as_str()])
                            .inc();
                        info!(alert_id = %alert.id, kind = %kind, severity = %severity, value, threshold, "Usage alert raised");
                        state.alerts.push(alert.clone());
                        touched.push(alert.clone());
                        raised.push(alert);
                    }
                }
            }
        }

        if let Some(notifier) = &self.notifier {
            for alert in raised {
                notify::dispatch(Arc::clone(notifier), alert);
            }
        }

        touched
    }

    /// Mark an alert resolved. Unknown or already-resolved ids are a no-op.
    /// Returns whether anything changed.
    pub fn resolve(&self, alert_id: Uuid) -> bool {
        let mut state = self.state.lock();
        match state.alerts.iter_mut().find(|a| a.id == alert_id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                info!(alert_id = %alert_id, kind = %alert.kind, "Usage alert resolved");
                true
            }
            None => false,
        }
    }

    pub fn resolve_all(&self) -> usize {
        let mut state = self.state.lock();
        let mut count = 0;
        for alert in state.alerts.iter_mut().filter(|a| !a.resolved) {
            alert.resolved = true;
            count += 1;
        }
        count
    }

    pub fn alerts(&self) -> Vec<UsageAlert> {
        self.state.lock().alerts.clone()
    }

    pub fn unresolved_alerts(&self) -> Vec<UsageAlert> {
        self.state
            .lock()
            .alerts
            .iter()
            .filter(|a| !a.resolved)
            .cloned()
            .collect()
    }

    pub fn latest_sample(&self) -> Option<UsageSample> {
        self.state.lock().history.back().map(|(_, s)| *s)
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Compare the most recent window of samples against the one before it
    pub fn trend(&self, kind: UsageKind) -> Trend {
        let state = self.state.lock();
        let values: Vec<f64> = state.history.iter().map(|(_, s)| s.get(kind)).collect();
        classify_trend(&values)
    }

    pub fn trends(&self) -> Vec<(UsageKind, Trend)> {
        UsageKind::ALL.iter().map(|k| (*k, self.trend(*k))).collect()
    }

    /// Sample `source` every `interval` until the handle is aborted.
    /// Source errors are logged and the tick is skipped.
    pub fn spawn_sampler(
        self: Arc<Self>,
        source: Arc<dyn UsageSource>,
        interval: Duration,
    ) -> JoinHandle<()> {
        info!(interval_secs = interval.as_secs(), "Starting usage sampler");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match source.sample_usage().await {
                    Ok(usage) => {
                        let alerts = self.sample(usage);
                        debug!(active = alerts.len(), "Usage sample evaluated");
                    }
                    Err(e) => warn!(error = %e, "Failed to sample usage; skipping tick"),
                }
            }
        })
    }
}

fn classify_trend(values: &[f64]) -> Trend {
    let recent_start = values.len().saturating_sub(TREND_WINDOW);
    let previous_start = recent_start.saturating_sub(TREND_WINDOW);
    let recent = &values[recent_start..];
    let previous = &values[previous_start..recent_start];

    if recent.is_empty() || previous.is_empty() {
        return Trend::Stable;
    }

    let recent_avg = recent.iter().sum::<f64>() / recent.len() as f64;
    let previous_avg = previous.iter().sum::<f64>() / previous.len() as f64;

    if previous_avg == 0.0 {
        return if recent_avg > 0.0 { Trend::Increasing } else { Trend::Stable };
    }

    let change_pct = (recent_avg - previous_avg) / previous_avg * 100.0;
    if change_pct > TREND_THRESHOLD_PCT {
        Trend::Increasing
    } else if change_pct < -TREND_THRESHOLD_PCT {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor() -> ThresholdMonitor {
        ThresholdMonitor::new(ThresholdConfig::default()).unwrap()
    }

    #[test]
    fn test_no_alert_below_warning() {
        let m = monitor();
        assert!(m.sample(UsageSample::new(100.0, 100.0, 100.0)).is_empty());
        assert!(m.alerts().is_empty());
    }

    #[test]
    fn test_warning_at_threshold() {
        let m = monitor();
        let alerts = m.sample(UsageSample::new(400.0, 0.0, 0.0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, UsageKind::Storage);
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].threshold, 400.0);
    }

    #[test]
    fn test_critical_suppresses_warning() {
        let m = monitor();
        m.sample(UsageSample::new(0.0, 1950.0, 0.0));
        let alerts = m.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_repeated_breach_updates_in_place() {
        let m = monitor();
        let first = m.sample(UsageSample::new(410.0, 0.0, 0.0));
        let second = m.sample(UsageSample::new(420.0, 0.0, 0.0));

        let unresolved = m.unresolved_alerts();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].current_value, 420.0);
        assert_eq!(first[0].id, second[0].id);
    }

    #[test]
    fn test_breach_after_resolve_creates_new_alert() {
        let m = monitor();
        let id = m.sample(UsageSample::new(410.0, 0.0, 0.0))[0].id;
        assert!(m.resolve(id));
        m.sample(UsageSample::new(415.0, 0.0, 0.0));

        assert_eq!(m.alerts().len(), 2);
        assert_eq!(m.unresolved_alerts().len(), 1);
        assert_ne!(m.unresolved_alerts()[0].id, id);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let m = monitor();
        let id = m.sample(UsageSample::new(0.0, 0.0, 45_000.0))[0].id;
        assert!(m.resolve(id));
        assert!(!m.resolve(id));
        assert!(!m.resolve(Uuid::new_v4()));
        assert!(m.unresolved_alerts().is_empty());
    }

    #[test]
    fn test_resolve_all() {
        let m = monitor();
        m.sample(UsageSample::new(500.0, 1700.0, 48_000.0));
        assert_eq!(m.unresolved_alerts().len(), 3);
        assert_eq!(m.resolve_all(), 3);
        assert_eq!(m.resolve_all(), 0);
    }

    #[test]
    fn test_trend_classification() {
        assert_eq!(classify_trend(&[]), Trend::Stable);
        assert_eq!(classify_trend(&[1.0, 2.0, 3.0]), Trend::Stable);

        let rising: Vec<f64> = (0..12).map(|i| if i < 6 { 100.0 } else { 110.0 }).collect();
        assert_eq!(classify_trend(&rising), Trend::Increasing);

        let falling: Vec<f64> = (0..12).map(|i| if i < 6 { 100.0 } else { 90.0 }).collect();
        assert_eq!(classify_trend(&falling), Trend::Decreasing);

        let flat: Vec<f64> = (0..12).map(|i| if i < 6 { 100.0 } else { 104.0 }).collect();
        assert_eq!(classify_trend(&flat), Trend::Stable);

        let from_zero: Vec<f64> = (0..12).map(|i| if i < 6 { 0.0 } else { 5.0 }).collect();
        assert_eq!(classify_trend(&from_zero), Trend::Increasing);

        // partial previous window still counts
        let short: Vec<f64> = vec![100.0, 100.0, 50.0, 50.0, 50.0, 50.0, 50.0, 50.0];
        assert_eq!(classify_trend(&short), Trend::Decreasing);
    }

    #[test]
    fn test_history_pruned_to_24h() {
        let m = monitor();
        let start = Utc::now() - ChronoDuration::hours(30);
        for i in 0..4 {
            m.sample_at(UsageSample::new(1.0, 1.0, 1.0), start + ChronoDuration::hours(i * 10));
        }
        // samples at +0h, +10h, +20h, +30h; the first falls outside the window
        assert_eq!(m.history_len(), 3);
    }

    #[test]
    fn test_trend_uses_history() {
        let m = monitor();
        let start = Utc::now() - ChronoDuration::hours(12);
        for i in 0..12 {
            let storage = if i < 6 { 100.0 } else { 200.0 };
            m.sample_at(
                UsageSample::new(storage, 50.0, 10.0),
                start + ChronoDuration::hours(i),
            );
        }
        assert_eq!(m.trend(UsageKind::Storage), Trend::Increasing);
        assert_eq!(m.trend(UsageKind::Bandwidth), Trend::Stable);
    }

    struct CountingNotifier(AtomicUsize);

    #[async_trait]
    impl AlertNotifier for CountingNotifier {
        async fn notify(&self, _alert: &UsageAlert) -> PerfResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl AlertNotifier for FailingNotifier {
        async fn notify(&self, _alert: &UsageAlert) -> PerfResult<()> {
            Err(crate::error::PerfError::Notify("channel down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_notifier_called_once_per_new_alert() {
        let counter = Arc::new(CountingNotifier(AtomicUsize::new(0)));
        let m = monitor().with_notifier(counter.clone());

        m.sample(UsageSample::new(410.0, 0.0, 0.0));
        m.sample(UsageSample::new(420.0, 0.0, 0.0));
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_notifier_is_swallowed() {
        let m = monitor().with_notifier(Arc::new(FailingNotifier));
        let alerts = m.sample(UsageSample::new(480.0, 0.0, 0.0));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(alerts.len(), 1);
        assert_eq!(m.unresolved_alerts().len(), 1);
    }

    struct StaticSource(UsageSample);

    #[async_trait]
    impl UsageSource for StaticSource {
        async fn sample_usage(&self) -> PerfResult<UsageSample> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_resolved_alerts_age_out() {
        let m = monitor();
        let start = Utc::now() - ChronoDuration::hours(30);
        let old = m.sample_at(UsageSample::new(410.0, 0.0, 0.0), start)[0].id;
        m.resolve(old);
        let open = m.sample_at(UsageSample::new(0.0, 1700.0, 0.0), start)[0].id;

        m.sample_at(UsageSample::new(0.0, 0.0, 0.0), start + ChronoDuration::hours(25));

        let alerts = m.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, open);
    }

    #[test]
    fn test_recently_resolved_alerts_kept() {
        let m = monitor();
        let id = m.sample(UsageSample::new(410.0, 0.0, 0.0))[0].id;
        m.resolve(id);
        m.sample(UsageSample::new(0.0, 0.0, 0.0));
        assert_eq!(m.alerts().len(), 1);
        assert!(m.alerts()[0].resolved);
    }

    /// Fails on every other read
    struct FlakySource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UsageSource for FlakySource {
        async fn sample_usage(&self) -> PerfResult<UsageSample> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 1 {
                return Err(crate::error::PerfError::Usage("metering API timeout".to_string()));
            }
            Ok(UsageSample::new(10.0, 10.0, 10.0))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_skips_failed_ticks() {
        let m = Arc::new(monitor());
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
        });
        let handle = Arc::clone(&m).spawn_sampler(source.clone(), Duration::from_secs(60));

        // ticks at 0s, 60s, 120s; the second fails
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(m.history_len(), 2);

        // ticks at 180s, 240s, 300s
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert!(!handle.is_finished());
        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert_eq!(m.history_len(), 3);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_sampler_samples_periodically() {
        let m = Arc::new(monitor());
        let source = Arc::new(StaticSource(UsageSample::new(450.0, 0.0, 0.0)));
        let handle = Arc::clone(&m).spawn_sampler(source, Duration::from_secs(60));

        // first tick fires immediately, then every 60s
        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.abort();

        assert_eq!(m.history_len(), 3);
        assert_eq!(m.unresolved_alerts().len(), 1);
    }
}
