//! Memoization of derived metrics
//!
//! Keyed by service and a fingerprint of its series, so an unchanged series
//! (a stale service, or a fetch that returned identical data) is never
//! recomputed while the entry lives.

use super::metrics::compute_metrics;
use moka::sync::Cache;
use redboard_types::{DerivedMetrics, ServiceKey, UsageSeries};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const DEFAULT_CAPACITY: u64 = 1024;
const DEFAULT_TTL: Duration = Duration::from_secs(300);

pub struct MetricsCache {
    cache: Cache<(ServiceKey, u64), DerivedMetrics>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetricsCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached metrics for this exact series, computing them on a miss
    pub fn get_or_compute(&self, key: &ServiceKey, series: &UsageSeries) -> DerivedMetrics {
        let cache_key = (key.clone(), fingerprint(series));
        if let Some(metrics) = self.cache.get(&cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return metrics;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let metrics = compute_metrics(series);
        self.cache.insert(cache_key, metrics);
        metrics
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// (hits, misses) since creation
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for MetricsCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

/// Stable hash of dates and exact float bits
pub fn fingerprint(series: &UsageSeries) -> u64 {
    let mut hasher = DefaultHasher::new();
    series.len().hash(&mut hasher);
    for record in series.iter() {
        record.date.hash(&mut hasher);
        record.usage.to_bits().hash(&mut hasher);
        record.cost.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}
