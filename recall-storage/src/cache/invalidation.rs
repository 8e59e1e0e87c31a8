//! Repository-wide invalidation policies.

use std::fmt;

use recall_core::{CacheError, RecallResult};
use serde::{Deserialize, Serialize};

use super::registry::KeyRegistry;
use super::traits::CacheBackend;

/// How a repository's cached entries are cleared after a write.
///
/// Chosen once per backend by [`InvalidationStrategy::probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationStrategy {
    /// One `flush_tags` call on a taggable backend.
    TagBased,
    /// Evict every key recorded in the [`KeyRegistry`], one by one.
    KeyListBased,
}

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub strategy: InvalidationStrategy,
    /// Tags flushed, or keys whose eviction was attempted.
    pub attempted: usize,
    /// Entries actually removed.
    pub evicted: u64,
    /// Key evictions that returned an error.
    pub failed: usize,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// `InvalidationPartialFailure` when any eviction failed.
    pub fn into_result(self) -> Result<Self, CacheError> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(CacheError::InvalidationPartialFailure {
                failed: self.failed,
                attempted: self.attempted,
            })
        }
    }
}

impl InvalidationStrategy {
    /// Tag support wins when the backend offers it.
    pub fn probe(backend: &dyn CacheBackend) -> Self {
        if backend.as_taggable().is_some() {
            Self::TagBased
        } else {
            Self::KeyListBased
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TagBased => "tag_based",
            Self::KeyListBased => "key_list_based",
        }
    }

    /// Clear everything `identity` has cached.
    ///
    /// The key-list path empties the registry before evicting, so a failed
    /// eviction leaves a stale entry that expires by TTL rather than a stale
    /// registry record. Failures are counted in the report, never retried.
    pub async fn invalidate(
        &self,
        backend: &dyn CacheBackend,
        registry: &KeyRegistry,
        identity: &str,
        tags: &[String],
    ) -> RecallResult<InvalidationReport> {
        if let (Self::TagBased, Some(taggable)) = (self, backend.as_taggable()) {
            let evicted = taggable.flush_tags(tags).await?;
            return Ok(InvalidationReport {
                strategy: Self::TagBased,
                attempted: tags.len(),
                evicted,
                failed: 0,
            });
        }

        let keys = registry.sweep(identity).await?;
        let mut report = InvalidationReport {
            strategy: Self::KeyListBased,
            attempted: keys.len(),
            evicted: 0,
            failed: 0,
        };

        for key in &keys {
            match backend.forget(key).await {
                Ok(true) => report.evicted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(repository = identity, key = %key, error = %e, "Cache eviction failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
