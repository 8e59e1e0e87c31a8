//! In-process cache backend with optional tag support.
//!
//! Entries live in a `tokio::sync::RwLock`ed map and expire lazily: an
//! expired entry is removed by the read that finds it. Built with
//! [`InMemoryCacheBackend::with_tags`] the backend exposes [`TaggableCache`],
//! built with [`InMemoryCacheBackend::new`] it does not, which lets both
//! invalidation strategies run against the same store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::RecallResult;
use tokio::sync::RwLock;

use super::traits::{decode_set, set_with_member, CacheBackend, CacheStats, TaggableCache};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        });
        Self { value, expires_at }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Map-backed cache for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, Entry>>,
    tags: RwLock<HashMap<String, HashSet<String>>>,
    taggable: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCacheBackend {
    /// A backend without tag support.
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that supports tag-scoped flushes.
    pub fn with_tags() -> Self {
        Self {
            taggable: true,
            ..Self::default()
        }
    }

    /// Whether a live entry exists, without touching hit statistics.
    pub async fn contains(&self, key: &str) -> bool {
        let now = Utc::now();
        self.entries
            .read()
            .await
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored entries, expired ones included until read.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn insert(&self, key: &str, entry: Entry) {
        self.entries.write().await.insert(key.to_string(), entry);
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> RecallResult<Option<Vec<u8>>> {
        let now = Utc::now();
        let found = self.entries.read().await.get(key).cloned();

        match found {
            Some(entry) if !entry.is_expired(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.value))
            }
            Some(_) => {
                self.entries.write().await.remove(key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RecallResult<()> {
        self.insert(key, Entry::new(value, Some(ttl))).await;
        Ok(())
    }

    async fn forever(&self, key: &str, value: Vec<u8>) -> RecallResult<()> {
        self.insert(key, Entry::new(value, None)).await;
        Ok(())
    }

    async fn forget(&self, key: &str) -> RecallResult<bool> {
        let removed = self.entries.write().await.remove(key).is_some();
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> RecallResult<bool> {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let stored = entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.as_slice());

        match set_with_member(key, stored, member) {
            Some(bytes) => {
                entries.insert(key.to_string(), Entry::new(bytes, None));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn take_set(&self, key: &str) -> RecallResult<Vec<String>> {
        let now = Utc::now();
        let removed = self.entries.write().await.remove(key);
        Ok(match removed {
            Some(entry) => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if entry.is_expired(now) {
                    Vec::new()
                } else {
                    decode_set(key, &entry.value)
                }
            }
            None => Vec::new(),
        })
    }

    async fn stats(&self) -> RecallResult<CacheStats> {
        let entries = self.entries.read().await;
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: entries.len() as u64,
            memory_bytes: entries.values().map(|e| e.value.len() as u64).sum(),
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }

    fn as_taggable(&self) -> Option<&dyn TaggableCache> {
        if self.taggable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl TaggableCache for InMemoryCacheBackend {
    async fn put_tagged(
        &self,
        tags: &[String],
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> RecallResult<()> {
        self.insert(key, Entry::new(value, Some(ttl))).await;

        let mut index = self.tags.write().await;
        for tag in tags {
            index.entry(tag.clone()).or_default().insert(key.to_string());
        }
        Ok(())
    }

    async fn flush_tags(&self, tags: &[String]) -> RecallResult<u64> {
        let keys: HashSet<String> = {
            let mut index = self.tags.write().await;
            tags.iter()
                .filter_map(|tag| index.remove(tag))
                .flatten()
                .collect()
        };

        let mut entries = self.entries.write().await;
        let removed = keys.iter().filter(|key| entries.remove(*key).is_some()).count() as u64;
        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }
}
