// qperf demo binary
//
// Runs a short synthetic workload through the executor, feeds the threshold
// monitor from a simulated metering source and prints the resulting report.
// Configuration comes from the environment (see config.rs).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use qperf::cache::keys;
use qperf::monitoring::{init_tracing, MonitoringConfig, UsageSample, UsageSource};
use qperf::{with_caching, ExecuteOptions, PerfContext, PerfError, PerfResult};

/// Metering source that grows a little on every read
struct SimulatedUsage {
    current: Mutex<UsageSample>,
}

#[async_trait]
impl UsageSource for SimulatedUsage {
    async fn sample_usage(&self) -> PerfResult<UsageSample> {
        let mut usage = self.current.lock();
        usage.storage *= 1.08;
        usage.bandwidth *= 1.03;
        usage.api_requests += 2_500.0;
        Ok(*usage)
    }
}

async fn fetch_orders(page: u32) -> Result<Vec<String>, PerfError> {
    tokio::time::sleep(Duration::from_millis(15 + u64::from(page) * 10)).await;
    Ok((0..page * 5).map(|i| format!("order-{}", i)).collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let monitoring = MonitoringConfig::from_env();
    let _guard = init_tracing(&monitoring)?;

    let ctx = PerfContext::from_env()?;
    tracing::info!(config = ?ctx.config, "Starting qperf demo workload");

    // Repeated reads of a few pages; the second pass should be served from cache
    for _ in 0..2 {
        for page in 1..=4 {
            let key = keys::build_key("orders", [format!("page {}", page)]);
            let rows = ctx
                .executor
                .execute("orders.list", || fetch_orders(page), ExecuteOptions::cached(key))
                .await?;
            tracing::debug!(page, rows = rows.len(), "Fetched orders page");
        }
    }

    // A mutation invalidates the whole group
    let removed = ctx.executor.invalidate_prefix(&keys::prefix("orders"));
    tracing::info!(removed, "Invalidated order pages after batch update");

    let failing: Result<Vec<String>, PerfError> = ctx
        .executor
        .execute_uncached("receipts.export", || async {
            Err(PerfError::Operation("upstream timeout".to_string()))
        })
        .await;
    if let Err(e) = failing {
        tracing::warn!(error = %e, "Export failed as expected");
    }

    let customers = with_caching(
        Arc::clone(&ctx.executor),
        "customers.count",
        || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, PerfError>(1_284u64)
        },
        ExecuteOptions::cached("customers:count").with_ttl(Duration::from_secs(30)),
    );
    for _ in 0..3 {
        customers().await?;
    }

    // Usage sampling: drive a few samples directly, then start the periodic task
    let source = Arc::new(SimulatedUsage {
        current: Mutex::new(UsageSample::new(360.0, 1500.0, 38_000.0)),
    });
    for _ in 0..4 {
        let usage = source.sample_usage().await?;
        ctx.monitor.sample(usage);
    }
    let sampler = ctx.start_sampler(source);

    // Let spawned alert deliveries run
    tokio::time::sleep(Duration::from_millis(50)).await;
    sampler.abort();

    println!("{}", ctx.report().generate());
    Ok(())
}
