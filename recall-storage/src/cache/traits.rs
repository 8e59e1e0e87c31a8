//! Cache backend traits and the cacheable value marker.
//!
//! Backends store opaque byte payloads under string keys. Serialization of
//! repository results happens in the decorator, so a backend never needs to
//! know the entity type and stays usable as a trait object.

use std::time::Duration;

use async_trait::async_trait;
use recall_core::RecallResult;
use serde::{de::DeserializeOwned, Serialize};

/// Marker for record types a repository may cache.
///
/// Blanket-implemented: any `Clone + Serialize + DeserializeOwned` type that
/// can cross task boundaries qualifies.
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheableEntity for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Key/value cache backend.
///
/// Implementations must be safe under concurrent use from many decorators.
/// Every method is a single atomic backend call; the decorator never wraps
/// several calls in a transaction.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Stored payload for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> RecallResult<Option<Vec<u8>>>;

    /// Store `value` under `key` for `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RecallResult<()>;

    /// Store `value` under `key` with no expiry.
    async fn forever(&self, key: &str, value: Vec<u8>) -> RecallResult<()>;

    /// Remove `key`. Returns whether an entry was present; removing an
    /// absent key is not an error.
    async fn forget(&self, key: &str) -> RecallResult<bool>;

    /// Add `member` to the string set stored under `key`, with no expiry,
    /// as one atomic step. A missing, expired or undecodable value counts as
    /// an empty set. Returns whether `member` was new.
    async fn add_to_set(&self, key: &str, member: &str) -> RecallResult<bool>;

    /// Remove `key` and return its set, as one atomic step. An undecodable
    /// value is still removed and read as an empty set.
    async fn take_set(&self, key: &str) -> RecallResult<Vec<String>>;

    async fn stats(&self) -> RecallResult<CacheStats>;

    /// Tag capability, when the backend has one.
    fn as_taggable(&self) -> Option<&dyn TaggableCache> {
        None
    }
}

/// Backends that can group entries under tags and flush a group at once.
#[async_trait]
pub trait TaggableCache: CacheBackend {
    /// Store `value` under `key`, attached to every tag in `tags`.
    async fn put_tagged(
        &self,
        tags: &[String],
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> RecallResult<()>;

    /// Remove every entry attached to any of `tags`. Returns the number of
    /// entries removed.
    async fn flush_tags(&self, tags: &[String]) -> RecallResult<u64>;
}

/// Members of a stored set. Anything that is not a JSON array of strings
/// reads as empty.
pub fn decode_set(key: &str, bytes: &[u8]) -> Vec<String> {
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        tracing::warn!(key = %key, error = %e, "Discarding undecodable set");
        Vec::new()
    })
}

/// `stored` with `member` appended, or `None` when it is already present.
pub fn set_with_member(key: &str, stored: Option<&[u8]>, member: &str) -> Option<Vec<u8>> {
    let mut members = stored.map(|bytes| decode_set(key, bytes)).unwrap_or_default();
    if members.iter().any(|m| m == member) {
        return None;
    }
    members.push(member.to_string());
    // A Vec<String> always serializes.
    serde_json::to_vec(&members).ok()
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload size in bytes.
    pub memory_bytes: u64,
    /// Entries removed by expiry, forget or flush.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
