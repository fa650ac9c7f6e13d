//! Result cache with TTL validity and tag-based invalidation
//!
//! Expired entries are inert: `get` skips them and the next `set`
//! overwrites them. `sweep_expired` only bounds memory. Backend failures are
//! logged and treated as misses; the cache is never a correctness
//! dependency.

pub mod backend;
pub mod ttl;

pub use backend::{CacheBackend, CacheEntry, MemoryBackend};
pub use ttl::{ContentType, TtlPolicy};

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub swept: u64,
    pub backend_errors: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    swept: AtomicU64,
    backend_errors: AtomicU64,
}

pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            counters: Counters::default(),
        }
    }

    /// In-memory cache on the given clock
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), clock)
    }

    /// Value for `key` if present and within its TTL
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).await.map(|entry| entry.value)
    }

    /// Valid entry for `key`, with its store time and TTL
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.lookup(key).await;
        self.count_lookup(entry.is_some());
        entry
    }

    /// Valid entry for `key` without touching the hit/miss counters. The
    /// caller reports the outcome with `count_lookup` once it knows whether
    /// the entry was usable.
    pub(crate) async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let found = match self.backend.get_entry(key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.backend_failed("get", key, &e);
                None
            }
        };
        found.filter(|entry| entry.is_valid_at(self.clock.now()))
    }

    pub(crate) fn count_lookup(&self, hit: bool) {
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Store `value` under `key`, replacing any previous entry
    pub async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) {
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            stored_at: self.clock.now(),
            ttl_ms: ttl.as_millis().min(u64::MAX as u128) as u64,
            tags: tags.to_vec(),
        };

        match self.backend.put_entry(entry).await {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.backend_failed("set", key, &e),
        }
    }

    /// Remove every entry carrying any of `tags`. Returns entries removed.
    pub async fn invalidate_by_tags(&self, tags: &[String]) -> usize {
        let mut removed = 0;
        for tag in tags {
            let keys = match self.backend.keys_for_tag(tag).await {
                Ok(keys) => keys,
                Err(e) => {
                    self.backend_failed("invalidate", tag, &e);
                    continue;
                }
            };

            for key in keys {
                match self.backend.remove(&key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => self.backend_failed("invalidate", &key, &e),
                }
            }

            if let Err(e) = self.backend.clear_tag(tag).await {
                self.backend_failed("invalidate", tag, &e);
            }
        }

        self.counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, tags = ?tags, "Invalidated cache entries by tag");
        }
        removed
    }

    /// Remove entries past their TTL. Returns entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let entries = match self.backend.entries().await {
            Ok(entries) => entries,
            Err(e) => {
                self.backend_failed("sweep", "*", &e);
                return 0;
            }
        };

        let now = self.clock.now();
        let mut removed = 0;
        for entry in entries.iter().filter(|e| !e.is_valid_at(now)) {
            match self.backend.remove(&entry.key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => self.backend_failed("sweep", &entry.key, &e),
            }
        }

        self.counters.swept.fetch_add(removed as u64, Ordering::Relaxed);
        tracing::debug!(removed, remaining = entries.len() - removed, "Cache sweep completed");
        removed
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.clear().await {
            self.backend_failed("clear", "*", &e);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.backend.entries().await.map(|e| e.len()).unwrap_or(0);
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            swept: self.counters.swept.load(Ordering::Relaxed),
            backend_errors: self.counters.backend_errors.load(Ordering::Relaxed),
            entries,
        }
    }

    fn backend_failed(&self, operation: &str, key: &str, error: &crate::error::Error) {
        self.counters.backend_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(operation, key, error = %error, "Cache backend failure treated as miss");
    }
}
