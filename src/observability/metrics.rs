//! Metrics collection.
//!
//! Atomic counters shared by the key manager and the customer context.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram using fixed buckets.
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    bucket_bounds: Vec<f64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(bucket_bounds: Vec<f64>) -> Self {
        let buckets = (0..=bucket_bounds.len())
            .map(|_| AtomicU64::new(0))
            .collect();
        Self {
            buckets,
            bucket_bounds,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn default_latency() -> Self {
        Self::new(vec![
            10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
        ])
    }

    pub fn observe(&self, value: f64) {
        let bucket_idx = self
            .bucket_bounds
            .iter()
            .position(|&bound| value <= bound)
            .unwrap_or(self.bucket_bounds.len());

        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
        self.sum
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Sum of observed values, in the unit they were observed in.
    pub fn sum(&self) -> f64 {
        self.sum.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Counters for one customer context and its key manager.
#[derive(Debug)]
pub struct ContextMetrics {
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub key_refreshes: Counter,
    pub key_refresh_failures: Counter,
    pub auth_retries: Counter,
    pub remote_calls: Counter,
    pub remote_failures: Counter,
    pub remote_latency_ms: Histogram,
}

impl ContextMetrics {
    pub fn new() -> Self {
        Self {
            cache_hits: Counter::new(),
            cache_misses: Counter::new(),
            key_refreshes: Counter::new(),
            key_refresh_failures: Counter::new(),
            auth_retries: Counter::new(),
            remote_calls: Counter::new(),
            remote_failures: Counter::new(),
            remote_latency_ms: Histogram::default_latency(),
        }
    }

    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    pub fn record_remote_call(&self, success: bool, latency_ms: f64) {
        self.remote_calls.inc();
        self.remote_latency_ms.observe(latency_ms);
        if !success {
            self.remote_failures.inc();
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary::from_metrics(self)
    }
}

impl Default for ContextMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of [`ContextMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub key_refreshes: u64,
    pub key_refresh_failures: u64,
    pub auth_retries: u64,
    pub remote_calls: u64,
    pub remote_failures: u64,
    pub avg_remote_latency_ms: f64,
}

impl MetricsSummary {
    pub fn from_metrics(metrics: &ContextMetrics) -> Self {
        let count = metrics.remote_latency_ms.count();
        let avg_latency = if count > 0 {
            metrics.remote_latency_ms.sum() / count as f64
        } else {
            0.0
        };

        Self {
            cache_hits: metrics.cache_hits.get(),
            cache_misses: metrics.cache_misses.get(),
            key_refreshes: metrics.key_refreshes.get(),
            key_refresh_failures: metrics.key_refresh_failures.get(),
            auth_retries: metrics.auth_retries.get(),
            remote_calls: metrics.remote_calls.get(),
            remote_failures: metrics.remote_failures.get(),
            avg_remote_latency_ms: avg_latency,
        }
    }

    /// Fraction of customer lookups served from cache.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);
        counter.inc();
        assert_eq!(counter.get(), 1);
        counter.add(5);
        assert_eq!(counter.get(), 6);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new(vec![10.0, 100.0]);
        histogram.observe(5.0);
        histogram.observe(50.0);
        histogram.observe(500.0);
        assert_eq!(histogram.count(), 3);
        assert!((histogram.sum() - 555.0).abs() < 0.01);
    }

    #[test]
    fn test_summary() {
        let metrics = ContextMetrics::new();
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_remote_call(true, 20.0);
        metrics.record_remote_call(false, 40.0);

        let summary = metrics.summary();
        assert_eq!(summary.cache_hits, 2);
        assert_eq!(summary.cache_misses, 1);
        assert_eq!(summary.remote_calls, 2);
        assert_eq!(summary.remote_failures, 1);
        assert!((summary.avg_remote_latency_ms - 30.0).abs() < 0.01);
        assert!((summary.cache_hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_hit_rate() {
        assert_eq!(MetricsSummary::default().cache_hit_rate(), 0.0);
    }
}
