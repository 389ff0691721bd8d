//! qperf: query execution cache and performance monitor
//!
//! Wraps async data-fetch operations with cache-aside memoization,
//! latency metrics and slow-query hooks, and watches resource usage
//! against warning/critical thresholds.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod monitoring;

pub use cache::TtlCache;
pub use config::{PerfConfig, ThresholdConfig, ThresholdPair};
pub use context::PerfContext;
pub use error::{PerfError, PerfResult};
pub use executor::{with_caching, ExecuteOptions, QueryExecutor, SlowQueryHook};
