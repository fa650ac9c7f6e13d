//! Query executor: the single entry point for running a unit of work with
//! result caching, latency sampling and slow-query detection.
//!
//! Flow for `run`:
//! 1. Build the cache key from the query id and a short hash of the text.
//! 2. On a valid cache hit, record a cache-hit sample and return the cached
//!    value. If less than `refresh_fraction` of the TTL remains, re-run the
//!    work in the background and store a fresh entry.
//! 3. On a miss, run the work, record its wall-clock time, cache the result
//!    when it is cacheable and warn when it is slow.
//! 4. If the work fails, the error is logged with the elapsed time and
//!    returned unchanged. There are no retries.
//!
//! Concurrent misses for the same key are not deduplicated.

pub mod tasks;

pub use tasks::BackgroundTasks;

use crate::cache::{CacheEntry, ContentType, ResultCache, TtlPolicy};
use crate::config::ExecutorConfig;
use crate::monitoring::metrics::{MetricStore, QuerySample};
use dashmap::DashSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Query ids containing any of these are treated as writes and never cached
const WRITE_MARKERS: &[&str] = &[
    "insert", "update", "delete", "create", "upsert", "remove", "write", "mutation",
];

/// Per-call caching hints
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the TTL heuristic
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub content_type: Option<ContentType>,
}

impl RunOptions {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Executor counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub total_runs: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub failures: u64,
    pub slow_queries: u64,
    pub cached_results: u64,
    pub background_refreshes: u64,
    pub background_failures: u64,
}

#[derive(Default)]
struct Counters {
    total_runs: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    failures: AtomicU64,
    slow_queries: AtomicU64,
    cached_results: AtomicU64,
    background_refreshes: AtomicU64,
}

/// `query_id:` followed by the first 8 bytes of SHA-256(raw text), hex encoded
pub fn cache_key(query_id: &str, raw_query_text: &str) -> String {
    let digest = Sha256::digest(raw_query_text.as_bytes());
    format!("{}:{}", query_id, hex::encode(&digest[..8]))
}

/// Element count of a serialized result: array length, or the length of an
/// array under `items`, `rows` or `data`
pub fn result_count(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => ["items", "rows", "data"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_array))
            .map(Vec::len),
        _ => None,
    }
}

pub fn is_read_only(query_id: &str) -> bool {
    let id = query_id.to_lowercase();
    !WRITE_MARKERS.iter().any(|marker| id.contains(marker))
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Marks a key as being refreshed until dropped
struct RefreshSlot {
    keys: Arc<DashSet<String>>,
    key: String,
}

impl Drop for RefreshSlot {
    fn drop(&mut self) {
        self.keys.remove(&self.key);
    }
}

pub struct QueryExecutor {
    config: ExecutorConfig,
    metrics: Arc<MetricStore>,
    cache: Arc<ResultCache>,
    ttl_policy: TtlPolicy,
    tasks: BackgroundTasks,
    refreshing: Arc<DashSet<String>>,
    counters: Counters,
}

impl QueryExecutor {
    pub fn new(
        config: ExecutorConfig,
        metrics: Arc<MetricStore>,
        cache: Arc<ResultCache>,
        ttl_policy: TtlPolicy,
    ) -> Self {
        Self {
            config,
            metrics,
            cache,
            ttl_policy,
            tasks: BackgroundTasks::new(),
            refreshing: Arc::new(DashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Run `work` with default caching options
    pub async fn run<T, E, F, Fut>(&self, query_id: &str, raw_query_text: &str, work: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run_with(query_id, raw_query_text, RunOptions::default(), work)
            .await
    }

    /// Run `work` through the cache, recording a sample for the execution
    pub async fn run_with<T, E, F, Fut>(
        &self,
        query_id: &str,
        raw_query_text: &str,
        options: RunOptions,
        work: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let started = Instant::now();
        let key = cache_key(query_id, raw_query_text);
        self.counters.total_runs.fetch_add(1, Ordering::Relaxed);

        if let Some(entry) = self.cache.lookup(&key).await {
            match serde_json::from_value::<T>(entry.value.clone()) {
                Ok(value) => {
                    self.cache.count_lookup(true);
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    self.record(query_id, raw_query_text, elapsed_ms(started), result_count(&entry.value), true);

                    if self.should_refresh_in_background(&entry) {
                        self.spawn_refresh(query_id, entry, work);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        query_id,
                        key = %key,
                        error = %e,
                        "Cached value does not decode; treating as miss"
                    );
                    self.cache.count_lookup(false);
                }
            }
        } else {
            self.cache.count_lookup(false);
        }

        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        let execution_start = Instant::now();
        match work().await {
            Ok(value) => {
                let execution_time_ms = elapsed_ms(execution_start);
                let serialized = serde_json::to_value(&value);
                let count = serialized.as_ref().ok().and_then(result_count);
                self.record(query_id, raw_query_text, execution_time_ms, count, false);

                if execution_time_ms > self.config.slow_query_threshold_ms {
                    self.counters.slow_queries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        query_id,
                        execution_time_ms,
                        threshold_ms = self.config.slow_query_threshold_ms,
                        "Slow query detected"
                    );
                }

                match serialized {
                    Ok(json) if self.is_cacheable(query_id, execution_time_ms, &json) => {
                        let ttl = self
                            .ttl_policy
                            .ttl_for(&key, options.content_type, options.ttl);
                        self.cache.set(&key, json, ttl, &options.tags).await;
                        self.counters.cached_results.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(query_id, error = %e, "Result not serializable; skipping cache");
                    }
                }

                Ok(value)
            }
            Err(error) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    query_id,
                    execution_time_ms = elapsed_ms(execution_start),
                    error = %error,
                    "Query execution failed"
                );
                Err(error)
            }
        }
    }

    /// Populate the cache in the background, regardless of execution time
    pub fn warm<T, E, F, Fut>(&self, query_id: &str, raw_query_text: &str, options: RunOptions, work: F) -> bool
    where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = cache_key(query_id, raw_query_text);
        let ttl = self
            .ttl_policy
            .ttl_for(&key, options.content_type, options.ttl);
        let cache = Arc::clone(&self.cache);
        let tags = options.tags;

        self.tasks.spawn(format!("cache_warm:{}", query_id), async move {
            let value = work().await.map_err(|e| e.to_string())?;
            let json = serde_json::to_value(&value).map_err(|e| e.to_string())?;
            cache.set(&key, json, ttl, &tags).await;
            Ok(())
        })
    }

    /// Remove cached results carrying any of `tags`
    pub async fn invalidate(&self, tags: &[String]) -> usize {
        self.cache.invalidate_by_tags(tags).await
    }

    /// True once less than `refresh_fraction` of the entry's TTL remains
    pub fn should_refresh_in_background(&self, entry: &CacheEntry) -> bool {
        let remaining = entry.remaining_ttl_ms(self.metrics.now()) as f64;
        remaining < entry.ttl_ms as f64 * self.config.refresh_fraction
    }

    /// Slow enough to be worth caching, not an oversized collection, and a read
    pub fn is_cacheable(&self, query_id: &str, execution_time_ms: f64, result: &Value) -> bool {
        execution_time_ms >= self.config.min_cacheable_time_ms
            && result_count(result).map_or(true, |count| count <= self.config.max_cacheable_elements)
            && is_read_only(query_id)
    }

    /// Wait for background refresh and warm tasks
    pub async fn wait_for_background(&self) {
        self.tasks.wait_idle().await;
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            total_runs: self.counters.total_runs.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            slow_queries: self.counters.slow_queries.load(Ordering::Relaxed),
            cached_results: self.counters.cached_results.load(Ordering::Relaxed),
            background_refreshes: self.counters.background_refreshes.load(Ordering::Relaxed),
            background_failures: self.tasks.failed(),
        }
    }

    fn spawn_refresh<T, E, F, Fut>(&self, query_id: &str, entry: CacheEntry, work: F)
    where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        // One refresh per key at a time; further hits keep serving the entry.
        if !self.refreshing.insert(entry.key.clone()) {
            return;
        }
        let slot = RefreshSlot {
            keys: Arc::clone(&self.refreshing),
            key: entry.key.clone(),
        };

        self.counters
            .background_refreshes
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(query_id, key = %entry.key, "Refreshing cache entry in background");

        let cache = Arc::clone(&self.cache);
        let ttl = Duration::from_millis(entry.ttl_ms);
        // The slot is released when the task ends, fails, panics or is
        // never spawned.
        self.tasks.spawn(format!("cache_refresh:{}", query_id), async move {
            let _slot = slot;
            let value = work().await.map_err(|e| e.to_string())?;
            let json = serde_json::to_value(&value).map_err(|e| e.to_string())?;
            cache.set(&entry.key, json, ttl, &entry.tags).await;
            Ok::<(), String>(())
        });
    }

    fn record(
        &self,
        query_id: &str,
        raw_query_text: &str,
        execution_time_ms: f64,
        result_count: Option<usize>,
        cache_hit: bool,
    ) {
        self.metrics.record(QuerySample {
            query_id: query_id.to_string(),
            raw_query_text: raw_query_text.to_string(),
            execution_time_ms,
            timestamp: self.metrics.now(),
            result_count,
            cache_hit,
        });
    }
}
