// src/context.rs
// Explicitly constructed service object owning the shared cache, recorder,
// executor and threshold monitor. Pass it (or its Arcs) to callers instead
// of reaching for globals.

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::TtlCache;
use crate::config::{PerfConfig, ThresholdConfig};
use crate::error::PerfResult;
use crate::executor::{QueryExecutor, SlowQueryHook};
use crate::monitoring::metrics::MetricsRecorder;
use crate::monitoring::notify::{notifier_from_config, AlertNotifier};
use crate::monitoring::report::ReportGenerator;
use crate::monitoring::thresholds::{ThresholdMonitor, UsageSource};

#[derive(Clone)]
pub struct PerfContext {
    pub config: PerfConfig,
    pub cache: Arc<TtlCache<Value>>,
    pub recorder: Arc<MetricsRecorder>,
    pub executor: Arc<QueryExecutor>,
    pub monitor: Arc<ThresholdMonitor>,
}

impl PerfContext {
    /// Build with the notifier implied by `thresholds` (webhook or log)
    pub fn new(config: PerfConfig, thresholds: ThresholdConfig) -> PerfResult<Self> {
        let notifier = notifier_from_config(&thresholds);
        Self::with_parts(config, thresholds, notifier, None)
    }

    pub fn from_env() -> PerfResult<Self> {
        Self::new(PerfConfig::from_env()?, ThresholdConfig::from_env()?)
    }

    pub fn with_parts(
        config: PerfConfig,
        thresholds: ThresholdConfig,
        notifier: Arc<dyn AlertNotifier>,
        slow_hook: Option<SlowQueryHook>,
    ) -> PerfResult<Self> {
        config.validate()?;
        let cache = Arc::new(TtlCache::new(config.max_cache_size, config.default_ttl())?);
        let recorder = Arc::new(MetricsRecorder::new(
            config.metrics_retention,
            config.slow_query_threshold_ms,
        )?);

        let mut executor =
            QueryExecutor::with_shared(config.clone(), Arc::clone(&cache), Arc::clone(&recorder))?;
        if let Some(hook) = slow_hook {
            executor = executor.with_slow_hook(move |metric| hook(metric));
        }

        let monitor = ThresholdMonitor::new(thresholds)?.with_notifier(notifier);

        tracing::info!(
            max_cache_size = config.max_cache_size,
            default_ttl_secs = config.default_ttl_secs,
            slow_query_threshold_ms = config.slow_query_threshold_ms,
            cache_enabled = config.cache_enabled,
            "Query performance layer initialized"
        );

        Ok(Self {
            config,
            cache,
            recorder,
            executor: Arc::new(executor),
            monitor: Arc::new(monitor),
        })
    }

    pub fn report(&self) -> ReportGenerator {
        ReportGenerator::new(Arc::clone(&self.recorder), Arc::clone(&self.monitor))
            .with_cache(Arc::clone(&self.cache))
    }

    /// Start periodic usage sampling at the configured interval
    pub fn start_sampler(&self, source: Arc<dyn UsageSource>) -> JoinHandle<()> {
        let interval = self.monitor.config().sample_interval();
        Arc::clone(&self.monitor).spawn_sampler(source, interval)
    }
}
