//! Per-query execution samples with bounded, time-limited retention
//!
//! Each query id owns a FIFO bucket capped at `max_samples_per_query`.
//! Samples older than the retention window are dropped by `prune`, which the
//! maintenance loop calls hourly. Statistics are recomputed from the raw
//! samples on every call; nothing aggregated is stored.

use crate::clock::Clock;
use crate::config::MetricsConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// One observed execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySample {
    pub query_id: String,
    pub raw_query_text: String,
    pub execution_time_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub result_count: Option<usize>,
    pub cache_hit: bool,
}

/// Index-selected percentiles
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Derived statistics for one query id or for all samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub average_time_ms: f64,
    pub p50_time_ms: f64,
    pub p95_time_ms: f64,
    pub p99_time_ms: f64,
    pub execution_count: usize,
    pub cache_hits: usize,
    pub slow_count: usize,
}

impl PerformanceSnapshot {
    /// Summarize `samples`, counting as slow those above `slow_threshold_ms`
    pub fn from_samples(samples: &[QuerySample], slow_threshold_ms: f64) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let total: f64 = samples.iter().map(|s| s.execution_time_ms).sum();
        let p = percentiles(samples);

        Self {
            average_time_ms: total / samples.len() as f64,
            p50_time_ms: p.p50,
            p95_time_ms: p.p95,
            p99_time_ms: p.p99,
            execution_count: samples.len(),
            cache_hits: samples.iter().filter(|s| s.cache_hit).count(),
            slow_count: samples
                .iter()
                .filter(|s| s.execution_time_ms > slow_threshold_ms)
                .count(),
        }
    }

    /// Cache hits as a percentage of executions
    pub fn cache_hit_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.execution_count as f64 * 100.0
        }
    }

    /// Slow samples as a fraction (0..=1) of executions
    pub fn slow_fraction(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.slow_count as f64 / self.execution_count as f64
        }
    }
}

/// Percentiles of the samples' execution times.
pub fn percentiles(samples: &[QuerySample]) -> Percentiles {
    let times: Vec<f64> = samples.iter().map(|s| s.execution_time_ms).collect();
    percentiles_of(&times)
}

/// Sorts ascending and picks `sorted[floor(n * p)]`; no interpolation
/// between ranks. Empty input yields zeros.
pub fn percentiles_of(times: &[f64]) -> Percentiles {
    if times.is_empty() {
        return Percentiles::default();
    }

    let mut sorted = times.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pick = |p: f64| {
        let index = (sorted.len() as f64 * p).floor() as usize;
        sorted[index.min(sorted.len() - 1)]
    };

    Percentiles {
        p50: pick(0.50),
        p95: pick(0.95),
        p99: pick(0.99),
    }
}

/// Concurrent store of execution samples keyed by query id
pub struct MetricStore {
    buckets: DashMap<String, VecDeque<QuerySample>>,
    max_samples: usize,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl MetricStore {
    pub fn new(config: &MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            max_samples: config.max_samples_per_query.max(1),
            retention: config.retention(),
            clock,
        }
    }

    /// Append a sample, evicting the oldest once the bucket is full
    pub fn record(&self, sample: QuerySample) {
        // The entry guard holds the shard lock, so push and trim are atomic.
        let mut bucket = self.buckets.entry(sample.query_id.clone()).or_default();
        bucket.push_back(sample);
        while bucket.len() > self.max_samples {
            bucket.pop_front();
        }
    }

    /// Drop samples older than `older_than`; empty buckets are removed.
    /// Returns the number of samples dropped.
    pub fn prune(&self, older_than: Duration) -> usize {
        let max_age = chrono::Duration::milliseconds(older_than.as_millis().min(i64::MAX as u128) as i64);
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let before = bucket.len();
            bucket.retain(|s| s.timestamp >= cutoff);
            removed += before - bucket.len();
            !bucket.is_empty()
        });

        if removed > 0 {
            tracing::debug!(removed, "Pruned expired query samples");
        }
        removed
    }

    /// Prune with the configured retention window
    pub fn prune_expired(&self) -> usize {
        self.prune(self.retention)
    }

    /// Samples for one query id in insertion order; empty if unknown
    pub fn samples_for(&self, query_id: &str) -> Vec<QuerySample> {
        self.buckets
            .get(query_id)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every retained sample, bucket by bucket
    pub fn all_samples(&self) -> Vec<QuerySample> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.value().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn query_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.buckets.iter().map(|b| b.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Most recently recorded query text for `query_id`
    pub fn latest_query_text(&self, query_id: &str) -> Option<String> {
        self.buckets
            .get(query_id)
            .and_then(|bucket| bucket.back().map(|s| s.raw_query_text.clone()))
    }

    pub fn sample_count(&self) -> usize {
        self.buckets.iter().map(|b| b.value().len()).sum()
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
