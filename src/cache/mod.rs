// src/cache/mod.rs
// Caching layer: TTL store and key helpers

pub mod cache_layer;
pub mod keys;

pub use cache_layer::{CacheEntry, CacheStats, TtlCache};
