//! Storage backends for the result cache
//!
//! The backend owns both the key -> entry map and the tag -> keys index.
//! A distributed backend may fail; `ResultCache` turns every backend error
//! into a miss.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub tags: Vec<String>,
}

impl CacheEntry {
    /// Valid iff `now - stored_at < ttl`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.age_ms(now) < self.ttl_ms
    }

    pub fn remaining_ttl_ms(&self, now: DateTime<Utc>) -> u64 {
        self.ttl_ms.saturating_sub(self.age_ms(now))
    }

    fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        crate::clock::millis_between(self.stored_at, now)
    }
}

/// Key/value storage with a tag index
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Raw entry, expired or not
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Insert or overwrite, re-indexing the entry's tags
    async fn put_entry(&self, entry: CacheEntry) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<bool>;

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>>;

    async fn clear_tag(&self, tag: &str) -> Result<()>;

    async fn entries(&self) -> Result<Vec<CacheEntry>>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    tags: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    fn unindex(&mut self, key: &str, tags: &[String]) {
        for tag in tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }
}

/// In-process backend. Entries and tag index share one lock so an
/// overwrite and its re-indexing are observed together.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get_entry(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.state.read().entries.get(key).cloned())
    }

    async fn put_entry(&self, entry: CacheEntry) -> Result<()> {
        let mut state = self.state.write();
        if let Some(previous) = state.entries.remove(&entry.key) {
            state.unindex(&previous.key, &previous.tags);
        }
        for tag in &entry.tags {
            state
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(entry.key.clone());
        }
        state.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut state = self.state.write();
        match state.entries.remove(key) {
            Some(entry) => {
                state.unindex(key, &entry.tags);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .read()
            .tags
            .get(tag)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_tag(&self, tag: &str) -> Result<()> {
        self.state.write().tags.remove(tag);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        Ok(self.state.read().entries.values().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        state.entries.clear();
        state.tags.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, tags: &[&str]) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: Value::from(key),
            stored_at: Utc::now(),
            ttl_ms: 1000,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_overwrite_reindexes_tags() {
        let backend = MemoryBackend::new();
        backend.put_entry(entry("k1", &["a"])).await.unwrap();
        backend.put_entry(entry("k1", &["b"])).await.unwrap();

        assert!(backend.keys_for_tag("a").await.unwrap().is_empty());
        assert_eq!(backend.keys_for_tag("b").await.unwrap(), vec!["k1".to_string()]);
    }

    #[tokio::test]
    async fn test_remove_unindexes() {
        let backend = MemoryBackend::new();
        backend.put_entry(entry("k1", &["a", "b"])).await.unwrap();
        assert!(backend.remove("k1").await.unwrap());
        assert!(!backend.remove("k1").await.unwrap());
        assert!(backend.keys_for_tag("a").await.unwrap().is_empty());
        assert!(backend.keys_for_tag("b").await.unwrap().is_empty());
    }

    #[test]
    fn test_entry_validity_boundary() {
        let mut e = entry("k", &[]);
        e.ttl_ms = 100;
        let at_ttl = e.stored_at + chrono::Duration::milliseconds(100);
        let before = e.stored_at + chrono::Duration::milliseconds(99);
        assert!(e.is_valid_at(before));
        assert!(!e.is_valid_at(at_ttl));
        assert_eq!(e.remaining_ttl_ms(before), 1);
    }
}
