// src/executor.rs
// Cache-aside query executor
//
// Wraps an async data-fetch with: cache lookup, latency measurement,
// cache population on success, a metric per call and a slow-query hook.
// Errors from the wrapped operation are returned unchanged and never cached.

use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::TtlCache;
use crate::config::PerfConfig;
use crate::error::PerfResult;
use crate::monitoring::metrics::{ExecutionMetric, MetricsRecorder, Outcome};

/// Called with the metric of every execution slower than the configured threshold
pub type SlowQueryHook = Arc<dyn Fn(&ExecutionMetric) + Send + Sync>;

/// Per-call caching options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub cache_key: Option<String>,
    /// Falls back to the configured default TTL
    pub ttl: Option<Duration>,
}

impl ExecuteOptions {
    pub fn uncached() -> Self {
        Self::default()
    }

    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            cache_key: Some(key.into()),
            ttl: None,
        }
    }

    /// A zero TTL is treated as unset
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Cache-aside executor.
///
/// At most one invocation of the wrapped operation happens per call.
/// Concurrent callers that miss on the same key each run the operation and
/// each write the cache; there is no request coalescing.
pub struct QueryExecutor {
    config: PerfConfig,
    cache: Arc<TtlCache<Value>>,
    recorder: Arc<MetricsRecorder>,
    slow_hook: Option<SlowQueryHook>,
}

impl QueryExecutor {
    /// Build an executor with its own cache and recorder
    pub fn new(config: PerfConfig) -> PerfResult<Self> {
        config.validate()?;
        let cache = Arc::new(TtlCache::new(config.max_cache_size, config.default_ttl())?);
        let recorder = Arc::new(MetricsRecorder::new(
            config.metrics_retention,
            config.slow_query_threshold_ms,
        )?);
        Ok(Self {
            config,
            cache,
            recorder,
            slow_hook: None,
        })
    }

    /// Build an executor over an existing cache and recorder
    pub fn with_shared(
        config: PerfConfig,
        cache: Arc<TtlCache<Value>>,
        recorder: Arc<MetricsRecorder>,
    ) -> PerfResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cache,
            recorder,
            slow_hook: None,
        })
    }

    pub fn with_slow_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&ExecutionMetric) + Send + Sync + 'static,
    {
        self.slow_hook = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &PerfConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TtlCache<Value>> {
        &self.cache
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    /// Run `operation` through the cache.
    ///
    /// On a hit the operation is not invoked and the recorded latency is the
    /// lookup cost only. On a miss the latency covers the operation itself.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_id: &str,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cache_key = options.cache_key.filter(|_| self.config.cache_enabled);

        if let Some(key) = cache_key.as_deref() {
            let lookup_start = Instant::now();
            if let Some(hit) = self.lookup::<T>(key) {
                let latency_ms = elapsed_ms(lookup_start);
                self.recorder.record(operation_id, Outcome::Cached, latency_ms, None);
                if self.config.enable_logging {
                    tracing::debug!(operation_id, cache_key = key, latency_ms, "Cache hit");
                }
                return Ok(hit);
            }
            if self.config.enable_logging {
                tracing::debug!(operation_id, cache_key = key, "Cache miss");
            }
        }

        let start = Instant::now();
        let result = operation().await;
        let latency_ms = elapsed_ms(start);

        match result {
            Ok(value) => {
                let result_count = self.populate(&value, cache_key, options.ttl, operation_id);
                let metric = self
                    .recorder
                    .record(operation_id, Outcome::Executed, latency_ms, result_count);
                self.check_slow(&metric);
                Ok(value)
            }
            Err(e) => {
                let metric = self.recorder.record(operation_id, Outcome::Error, latency_ms, None);
                if self.config.enable_logging {
                    tracing::debug!(operation_id, latency_ms, "Wrapped operation failed");
                }
                self.check_slow(&metric);
                Err(e)
            }
        }
    }

    /// Run without touching the cache
    pub async fn execute_uncached<T, E, F, Fut>(&self, operation_id: &str, operation: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute(operation_id, operation, ExecuteOptions::uncached()).await
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.delete(key)
    }

    /// Drop a whole key group after a mutation, e.g. `"orders:"`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.cache.delete_by_prefix(prefix)
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cache.get_with(key, |cached| match T::deserialize(cached) {
            Ok(value) => Some(value),
            Err(e) => {
                // Same key reused for a different result type
                tracing::warn!(cache_key = key, error = %e, "Cached value has unexpected shape; treating as miss");
                None
            }
        })
    }

    /// Store the result when a key was given; returns its cardinality
    fn populate<T: Serialize>(
        &self,
        value: &T,
        cache_key: Option<String>,
        ttl: Option<Duration>,
        operation_id: &str,
    ) -> Option<usize> {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                if cache_key.is_some() {
                    tracing::warn!(operation_id, error = %e, "Result not serializable; skipping cache");
                }
                return None;
            }
        };
        let count = cardinality(&json);

        if let Some(key) = cache_key {
            let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
            self.cache.set(key, json, ttl);
        }
        count
    }

    fn check_slow(&self, metric: &ExecutionMetric) {
        if metric.latency_ms <= self.config.slow_query_threshold_ms {
            return;
        }
        if self.config.enable_logging {
            tracing::warn!(
                operation_id = %metric.operation_id,
                outcome = %metric.outcome,
                latency_ms = metric.latency_ms,
                threshold_ms = self.config.slow_query_threshold_ms,
                "Slow query detected"
            );
        }
        if let Some(hook) = &self.slow_hook {
            hook(metric);
        }
    }
}

/// Wrap `operation` into a plain callable that always goes through `executor`
pub fn with_caching<T, E, F, Fut>(
    executor: Arc<QueryExecutor>,
    operation_id: impl Into<String>,
    operation: F,
    options: ExecuteOptions,
) -> impl Fn() -> BoxFuture<'static, Result<T, E>>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    E: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let operation_id = operation_id.into();
    let operation = Arc::new(operation);

    move || {
        let executor = Arc::clone(&executor);
        let operation = Arc::clone(&operation);
        let operation_id = operation_id.clone();
        let options = options.clone();
        async move {
            executor
                .execute(&operation_id, move || (*operation)(), options)
                .await
        }
        .boxed()
    }
}

/// Number of rows for list-shaped results
pub fn cardinality(value: &Value) -> Option<usize> {
    value.as_array().map(Vec::len)
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor(slow_ms: f64) -> QueryExecutor {
        QueryExecutor::new(PerfConfig {
            slow_query_threshold_ms: slow_ms,
            ..PerfConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_hit_skips_operation() {
        let exec = executor(1000.0);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let rows: Result<Vec<u32>, String> = exec
                .execute(
                    "orders.list",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![1, 2, 3])
                    },
                    ExecuteOptions::cached("orders:all"),
                )
                .await;
            assert_eq!(rows.unwrap(), vec![1, 2, 3]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let recent = exec.recorder().recent(2);
        assert_eq!(recent[0].outcome, Outcome::Executed);
        assert_eq!(recent[0].result_count, Some(3));
        assert_eq!(recent[1].outcome, Outcome::Cached);
    }

    #[tokio::test]
    async fn test_error_passthrough_not_cached() {
        let exec = executor(1000.0);
        let result: Result<Vec<u32>, String> = exec
            .execute(
                "orders.get",
                || async { Err("connection reset".to_string()) },
                ExecuteOptions::cached("orders:1"),
            )
            .await;

        assert_eq!(result.unwrap_err(), "connection reset");
        assert!(exec.cache().get("orders:1").is_none());
        assert_eq!(exec.recorder().summary().error_count, 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_executes() {
        let exec = QueryExecutor::new(PerfConfig {
            cache_enabled: false,
            ..PerfConfig::default()
        })
        .unwrap();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let _: Result<u32, String> = exec
                .execute(
                    "count",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(7)
                    },
                    ExecuteOptions::cached("count"),
                )
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(exec.cache().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_hook_fires_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let exec = executor(50.0).with_slow_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let _: Result<u32, String> = exec
            .execute_uncached("slow.report", || async {
                tokio::time::sleep(Duration::from_millis(120)).await;
                Ok(1)
            })
            .await;
        let _: Result<u32, String> = exec.execute_uncached("fast", || async { Ok(2) }).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        let slow = exec.recorder().slow_operations(None);
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0].outcome, Outcome::Executed);
        assert!(slow[0].latency_ms >= 120.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_reexecutes() {
        let exec = executor(1000.0);
        let calls = AtomicUsize::new(0);
        let options = ExecuteOptions::cached("customers:1").with_ttl(Duration::from_secs(5));

        for _ in 0..2 {
            let _: Result<String, String> = exec
                .execute(
                    "customers.get",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok("somchai".to_string())
                    },
                    options.clone(),
                )
                .await;
            tokio::time::advance(Duration::from_secs(6)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_a_miss() {
        let exec = executor(1000.0);
        exec.cache().set_default("shared", serde_json::json!({"not": "a list"}));

        let rows: Result<Vec<u32>, String> = exec
            .execute("rows", || async { Ok(vec![9]) }, ExecuteOptions::cached("shared"))
            .await;
        assert_eq!(rows.unwrap(), vec![9]);
        assert_eq!(exec.recorder().summary().executed_count, 1);

        let stats = exec.cache().stats();
        assert_eq!((stats.hits, stats.misses), (0, 1));
        assert_eq!(exec.cache().get("shared"), Some(serde_json::json!([9])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_hook_fires_with_logging_disabled() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let exec = QueryExecutor::new(PerfConfig {
            slow_query_threshold_ms: 50.0,
            enable_logging: false,
            ..PerfConfig::default()
        })
        .unwrap()
        .with_slow_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let _: Result<u32, String> = exec
            .execute(
                "slow.lookup",
                || async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(5)
                },
                ExecuteOptions::cached("slow:1"),
            )
            .await;
        // the hit is fast and must not fire again
        let _: Result<u32, String> = exec
            .execute("slow.lookup", || async { Ok(5) }, ExecuteOptions::cached("slow:1"))
            .await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(exec.recorder().summary().slow_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_option_uses_default() {
        let exec = executor(1000.0);
        let options = ExecuteOptions::cached("zero").with_ttl(Duration::ZERO);
        let _: Result<u32, String> = exec.execute("zero", || async { Ok(1) }, options).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(exec.cache().contains_key("zero"));
    }

    #[tokio::test]
    async fn test_with_caching_wrapper() {
        let exec = Arc::new(executor(1000.0));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let fetch = with_caching(
            Arc::clone(&exec),
            "bills.list",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(vec!["b1".to_string(), "b2".to_string()])
                }
            },
            ExecuteOptions::cached("bills:all"),
        );

        assert_eq!(fetch().await.unwrap().len(), 2);
        assert_eq!(fetch().await.unwrap().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(exec.invalidate_prefix("bills:"), 1);
        fetch().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[test]
    fn test_unserializable_result_warns_only_when_caching() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let exec = executor(1000.0);
        // tuple keys cannot become JSON object keys
        let pairs = || async { Ok::<_, String>(std::collections::HashMap::from([((1u8, 2u8), 3u8)])) };

        tracing::subscriber::with_default(subscriber, || {
            rt.block_on(async {
                assert_eq!(exec.execute_uncached("pairs", pairs).await.unwrap().len(), 1);
                assert!(!logs.text().contains("not serializable"));

                assert!(exec
                    .execute("pairs", pairs, ExecuteOptions::cached("pairs:1"))
                    .await
                    .is_ok());
                assert!(logs.text().contains("not serializable"));
            })
        });
        assert!(exec.cache().is_empty());
    }

    #[test]
    fn test_cardinality() {
        assert_eq!(cardinality(&serde_json::json!([1, 2])), Some(2));
        assert_eq!(cardinality(&serde_json::json!({"a": 1})), None);
    }
}
