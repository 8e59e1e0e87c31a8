//! Durable record of the keys a repository has issued.
//!
//! Used only when the backend cannot flush by tag. The key set lives in the
//! cache backend itself, stored without expiry, so it survives restarts of
//! a persistent backend.

use std::sync::Arc;

use recall_core::RecallResult;

use super::key::{CacheKey, KEY_NAMESPACE};
use super::traits::{decode_set, CacheBackend};

/// Key-set store for one cache backend.
#[derive(Clone)]
pub struct KeyRegistry {
    backend: Arc<dyn CacheBackend>,
}

impl KeyRegistry {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Backend key under which `identity`'s key set is stored.
    pub fn registry_key(identity: &str) -> String {
        format!("{}-{}-keys", KEY_NAMESPACE, identity)
    }

    /// Add `key` to `identity`'s set. Already registered keys are left alone.
    ///
    /// One atomic backend call, so registrations racing from many
    /// repository instances are never lost.
    pub async fn remember_key(&self, identity: &str, key: &CacheKey) -> RecallResult<()> {
        self.backend
            .add_to_set(&Self::registry_key(identity), key.as_str())
            .await?;
        Ok(())
    }

    /// Every key registered for `identity`, in registration order. An
    /// undecodable registry reads as empty and is replaced on the next
    /// registration.
    pub async fn keys(&self, identity: &str) -> RecallResult<Vec<String>> {
        let registry_key = Self::registry_key(identity);
        Ok(self
            .backend
            .get(&registry_key)
            .await?
            .map(|bytes| decode_set(&registry_key, &bytes))
            .unwrap_or_default())
    }

    /// Return `identity`'s key set and clear it, in one backend call.
    pub async fn sweep(&self, identity: &str) -> RecallResult<Vec<String>> {
        self.backend.take_set(&Self::registry_key(identity)).await
    }
}
