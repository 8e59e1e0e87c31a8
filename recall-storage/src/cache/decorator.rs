//! Remember-or-compute reads and repository-wide invalidation.
//!
//! [`CacheDecorator`] owns the attached backend, the invalidation strategy
//! probed from it and, for backends without tags, the key registry. It knows
//! nothing about repositories beyond their identity; [`CachingRepository`]
//! drives it per call.
//!
//! Caching never changes what a caller sees. A broken backend degrades to
//! direct computation, errors from the computation pass through untouched
//! and are never stored.
//!
//! [`CachingRepository`]: super::CachingRepository

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use recall_core::RecallResult;
use serde::{de::DeserializeOwned, Serialize};

use super::invalidation::{InvalidationReport, InvalidationStrategy};
use super::key::{CacheKey, KEY_NAMESPACE};
use super::registry::KeyRegistry;
use super::traits::CacheBackend;

struct Attached {
    backend: Arc<dyn CacheBackend>,
    strategy: InvalidationStrategy,
    registry: KeyRegistry,
}

/// Read-through cache for one repository identity.
pub struct CacheDecorator {
    identity: String,
    attached: Option<Attached>,
}

impl CacheDecorator {
    /// A decorator with no backend; every read computes directly.
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            attached: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.set_backend(Some(backend));
        self
    }

    /// Attach, swap or detach the backend. The strategy is probed here and
    /// nowhere else.
    pub fn set_backend(&mut self, backend: Option<Arc<dyn CacheBackend>>) {
        self.attached = backend.map(|backend| {
            let strategy = InvalidationStrategy::probe(backend.as_ref());
            tracing::info!(
                repository = %self.identity,
                strategy = %strategy,
                "Cache backend attached"
            );
            Attached {
                registry: KeyRegistry::new(Arc::clone(&backend)),
                backend,
                strategy,
            }
        });
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.attached.as_ref().map(|a| &a.backend)
    }

    pub fn strategy(&self) -> Option<InvalidationStrategy> {
        self.attached.as_ref().map(|a| a.strategy)
    }

    pub fn registry(&self) -> Option<&KeyRegistry> {
        self.attached.as_ref().map(|a| &a.registry)
    }

    /// Tag carried by every entry this repository stores.
    pub fn repository_tag(&self) -> String {
        format!("{}-{}", KEY_NAMESPACE, self.identity)
    }

    /// Repository tag followed by `extra`, without duplicates.
    pub fn tag_set(&self, extra: &[String]) -> Vec<String> {
        let repository_tag = self.repository_tag();
        let mut seen = BTreeSet::new();
        std::iter::once(repository_tag)
            .chain(extra.iter().cloned())
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }

    /// Serve `key` from the cache, or run `compute` and store its result.
    ///
    /// With `enabled` false or no backend attached the cache is neither read
    /// nor written and the registry is left alone. Without tags, a key that
    /// cannot be registered is never stored: an unregistered entry would
    /// outlive the next invalidation.
    pub async fn remember<T, F, Fut>(
        &self,
        enabled: bool,
        method: &str,
        key: &CacheKey,
        ttl: Duration,
        extra_tags: &[String],
        compute: F,
    ) -> RecallResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = RecallResult<T>> + Send,
    {
        let attached = match &self.attached {
            Some(attached) if enabled => attached,
            _ => {
                tracing::debug!(repository = %self.identity, method, key = %key, "Cache bypassed");
                return compute().await;
            }
        };

        if attached.strategy == InvalidationStrategy::KeyListBased {
            if let Err(e) = attached.registry.remember_key(&self.identity, key).await {
                tracing::warn!(
                    repository = %self.identity,
                    method,
                    key = %key,
                    error = %e,
                    "Failed to register cache key, computing directly"
                );
                return compute().await;
            }
        }

        match attached.backend.get(key.as_str()).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    tracing::debug!(repository = %self.identity, method, key = %key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => {
                    tracing::warn!(
                        repository = %self.identity,
                        method,
                        key = %key,
                        error = %e,
                        "Discarding undecodable cache entry"
                    );
                }
            },
            Ok(None) => {
                tracing::debug!(repository = %self.identity, method, key = %key, "Cache miss");
            }
            Err(e) => {
                tracing::warn!(
                    repository = %self.identity,
                    method,
                    key = %key,
                    error = %e,
                    "Cache backend unavailable, computing directly"
                );
                return compute().await;
            }
        }

        let value = compute().await?;
        self.store(attached, key, ttl, extra_tags, &value).await;
        Ok(value)
    }

    async fn store<T: Serialize>(
        &self,
        attached: &Attached,
        key: &CacheKey,
        ttl: Duration,
        extra_tags: &[String],
        value: &T,
    ) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(repository = %self.identity, key = %key, error = %e, "Result not cacheable");
                return;
            }
        };
        // Absent results are recomputed, never remembered.
        if bytes == b"null" {
            return;
        }

        let stored = match (attached.strategy, attached.backend.as_taggable()) {
            (InvalidationStrategy::TagBased, Some(taggable)) => {
                taggable
                    .put_tagged(&self.tag_set(extra_tags), key.as_str(), bytes, ttl)
                    .await
            }
            _ => attached.backend.put(key.as_str(), bytes, ttl).await,
        };

        if let Err(e) = stored {
            tracing::warn!(repository = %self.identity, key = %key, error = %e, "Failed to store cache entry");
        }
    }

    /// Clear every entry this repository has cached.
    ///
    /// Returns `None` when no backend is attached. With tags, the repository
    /// tag and `extra_tags` are flushed in one call.
    pub async fn invalidate_all(
        &self,
        extra_tags: &[String],
    ) -> RecallResult<Option<InvalidationReport>> {
        let Some(attached) = &self.attached else {
            return Ok(None);
        };

        let report = attached
            .strategy
            .invalidate(
                attached.backend.as_ref(),
                &attached.registry,
                &self.identity,
                &self.tag_set(extra_tags),
            )
            .await?;

        if !report.is_complete() {
            tracing::warn!(
                repository = %self.identity,
                failed = report.failed,
                attempted = report.attempted,
                "Cache invalidation partially failed"
            );
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::CacheKeyGenerator;
    use crate::cache::memory_backend::InMemoryCacheBackend;
    use recall_core::{CriteriaStack, RecallError, StorageError};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn key(method: &str) -> CacheKey {
        CacheKeyGenerator::new("projects").generate(method, &[json!(1)], &CriteriaStack::new())
    }

    async fn remember_counted(
        decorator: &CacheDecorator,
        enabled: bool,
        key: &CacheKey,
        calls: &AtomicUsize,
    ) -> Vec<i64> {
        decorator
            .remember(enabled, "get", key, TTL, &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![1, 2, 3])
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_remember_computes_once() {
        let decorator =
            CacheDecorator::new("projects").with_backend(Arc::new(InMemoryCacheBackend::new()));
        let calls = AtomicUsize::new(0);

        assert_eq!(remember_counted(&decorator, true, &key("get"), &calls).await, vec![1, 2, 3]);
        assert_eq!(remember_counted(&decorator, true, &key("get"), &calls).await, vec![1, 2, 3]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_or_detached_never_touches_cache() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let decorator = CacheDecorator::new("projects").with_backend(backend.clone());
        let calls = AtomicUsize::new(0);

        remember_counted(&decorator, false, &key("get"), &calls).await;
        remember_counted(&decorator, false, &key("get"), &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(backend.is_empty().await);

        let detached = CacheDecorator::new("projects");
        remember_counted(&detached, true, &key("get"), &calls).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_pass_through_and_are_not_stored() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let decorator = CacheDecorator::new("projects").with_backend(backend.clone());

        let result: RecallResult<Vec<i64>> = decorator
            .remember(true, "get", &key("get"), TTL, &[], || async {
                Err(RecallError::Storage(StorageError::LockPoisoned))
            })
            .await;

        assert_eq!(result, Err(RecallError::Storage(StorageError::LockPoisoned)));
        assert!(!backend.contains(key("get").as_str()).await);
    }

    #[tokio::test]
    async fn test_none_results_are_not_stored() {
        let backend = Arc::new(InMemoryCacheBackend::with_tags());
        let decorator = CacheDecorator::new("projects").with_backend(backend.clone());

        let found: Option<i64> = decorator
            .remember(true, "find", &key("find"), TTL, &[], || async { Ok(None) })
            .await
            .unwrap();

        assert_eq!(found, None);
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_key_list_mode_registers_keys() {
        let decorator =
            CacheDecorator::new("projects").with_backend(Arc::new(InMemoryCacheBackend::new()));
        let calls = AtomicUsize::new(0);
        remember_counted(&decorator, true, &key("get"), &calls).await;

        let registry = decorator.registry().unwrap();
        assert_eq!(
            registry.keys("projects").await.unwrap(),
            vec![key("get").into_string()]
        );
    }

    #[tokio::test]
    async fn test_tag_mode_skips_registry() {
        let backend = Arc::new(InMemoryCacheBackend::with_tags());
        let decorator = CacheDecorator::new("projects").with_backend(backend.clone());
        let calls = AtomicUsize::new(0);
        remember_counted(&decorator, true, &key("get"), &calls).await;

        assert!(!backend.contains(&KeyRegistry::registry_key("projects")).await);
        assert_eq!(decorator.strategy(), Some(InvalidationStrategy::TagBased));
    }

    #[tokio::test]
    async fn test_invalidate_all_then_recompute() {
        for backend in [InMemoryCacheBackend::new(), InMemoryCacheBackend::with_tags()] {
            let decorator = CacheDecorator::new("projects").with_backend(Arc::new(backend));
            let calls = AtomicUsize::new(0);

            remember_counted(&decorator, true, &key("get"), &calls).await;
            let report = decorator.invalidate_all(&[]).await.unwrap().unwrap();
            assert_eq!(report.evicted, 1);

            remember_counted(&decorator, true, &key("get"), &calls).await;
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        }
    }

    #[tokio::test]
    async fn test_set_backend_reprobes() {
        let mut decorator =
            CacheDecorator::new("projects").with_backend(Arc::new(InMemoryCacheBackend::new()));
        assert_eq!(decorator.strategy(), Some(InvalidationStrategy::KeyListBased));

        decorator.set_backend(Some(Arc::new(InMemoryCacheBackend::with_tags())));
        assert_eq!(decorator.strategy(), Some(InvalidationStrategy::TagBased));

        decorator.set_backend(None);
        assert!(decorator.strategy().is_none());
        assert!(decorator.invalidate_all(&[]).await.unwrap().is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            let bytes = self.0.lock().map(|b| b.clone()).unwrap_or_default();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Ok(mut bytes) = self.0.lock() {
                bytes.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_cache_events_carry_method() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let decorator =
            CacheDecorator::new("projects").with_backend(Arc::new(InMemoryCacheBackend::new()));
        let calls = AtomicUsize::new(0);
        let find = key("find");
        for _ in 0..2 {
            decorator
                .remember(true, "find_or_fail", &find, TTL, &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1])
                })
                .await
                .unwrap();
        }

        let text = logs.text();
        for event in ["Cache miss", "Cache hit"] {
            let line = text
                .lines()
                .find(|line| line.contains(event))
                .unwrap_or_else(|| panic!("no {} event in {:?}", event, text));
            assert!(line.contains("method"), "{}", line);
            assert!(line.contains("find_or_fail"), "{}", line);
            assert!(line.contains("repository"), "{}", line);
        }
    }

    #[test]
    fn test_tag_set_deduplicates() {
        let decorator = CacheDecorator::new("projects");
        let tags = decorator.tag_set(&[
            "recall-repository-projects".to_string(),
            "reports".to_string(),
            "reports".to_string(),
        ]);
        assert_eq!(tags, vec!["recall-repository-projects", "reports"]);
    }
}
