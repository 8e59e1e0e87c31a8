//! Caching wrapper around any [`Repository`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recall_core::{
    Attributes, CacheSettings, Columns, CriteriaStack, Criterion, FilterExpr, RecallError,
    RecallResult, StorageError,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::decorator::CacheDecorator;
use super::invalidation::InvalidationReport;
use super::key::{CacheKey, CacheKeyGenerator, ContextProvider};
use super::traits::{CacheBackend, CacheStats};
use crate::repository::{Page, Plucked, Repository, SimplePage};

/// A repository whose reads go through a read-through cache and whose
/// writes clear everything the repository has cached.
///
/// The criteria stack belongs to the wrapped repository; pushing criteria on
/// the wrapper pushes them there. Like the repository it wraps, an instance
/// is meant for one logical operation at a time. Share the backend, not the
/// wrapper.
///
/// ```ignore
/// let mut projects = CachingRepository::new(base, CacheSettings::default())?
///     .with_backend(Arc::new(InMemoryCacheBackend::with_tags()));
/// projects.push_criteria(FieldValueSet::single("status", "active"));
/// let active = projects.get(&Columns::All).await?;
/// ```
pub struct CachingRepository<R: Repository> {
    inner: R,
    settings: CacheSettings,
    keys: CacheKeyGenerator,
    decorator: CacheDecorator,
    skip_cache: bool,
    remember_tags: Vec<String>,
    flush_tags: Vec<String>,
}

impl<R: Repository> CachingRepository<R> {
    /// Wrap `inner`. Starts without a backend, so reads compute directly
    /// until one is attached.
    pub fn new(inner: R, settings: CacheSettings) -> RecallResult<Self> {
        settings.validate()?;
        let identity = inner.identity().to_string();
        Ok(Self {
            keys: CacheKeyGenerator::new(identity.clone()),
            decorator: CacheDecorator::new(identity),
            inner,
            settings,
            skip_cache: false,
            remember_tags: Vec::new(),
            flush_tags: Vec::new(),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.decorator.set_backend(Some(backend));
        self
    }

    /// Fold a request-scope identifier into every key.
    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.keys = self.keys.with_context(context);
        self
    }

    /// Per-repository cache lifetime, overriding the process-wide one.
    pub fn with_duration(mut self, minutes: u64) -> RecallResult<Self> {
        let settings = self.settings.with_duration(minutes);
        settings.validate()?;
        self.settings = settings;
        Ok(self)
    }

    /// Extra tags attached to every stored entry.
    pub fn with_remember_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.remember_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Extra tags flushed on every invalidation.
    pub fn with_flush_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.flush_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Bypass the cache for reads until turned back off. Writes are not
    /// affected; they always invalidate.
    pub fn skip_cache(&mut self, skip: bool) -> &mut Self {
        self.skip_cache = skip;
        self
    }

    pub fn cache_skipped(&self) -> bool {
        self.skip_cache
    }

    pub fn enable_cache(&mut self) -> &mut Self {
        self.settings.enabled = true;
        self
    }

    pub fn disable_cache(&mut self) -> &mut Self {
        self.settings.enabled = false;
        self
    }

    pub fn cache_enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Swap the backend. The invalidation strategy is probed again.
    pub fn set_cache_backend(&mut self, backend: Option<Arc<dyn CacheBackend>>) -> &mut Self {
        self.decorator.set_backend(backend);
        self
    }

    pub fn cache_backend(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.decorator.backend()
    }

    pub fn decorator(&self) -> &CacheDecorator {
        &self.decorator
    }

    pub fn cache_duration(&self) -> Duration {
        self.settings.ttl()
    }

    /// Key a read of `method(args)` would use under the current stack.
    pub fn cache_key(&self, method: &str, args: &[Value]) -> CacheKey {
        self.keys.generate(method, args, self.inner.criteria())
    }

    /// Clear everything this repository has cached.
    pub async fn reset_repository_cache(&self) -> RecallResult<Option<InvalidationReport>> {
        self.decorator.invalidate_all(&self.flush_tags).await
    }

    /// Backend statistics, when a backend is attached.
    pub async fn cache_stats(&self) -> RecallResult<Option<CacheStats>> {
        match self.decorator.backend() {
            Some(backend) => Ok(Some(backend.stats().await?)),
            None => Ok(None),
        }
    }

    fn reads_cached(&self) -> bool {
        self.settings.enabled && !self.skip_cache
    }

    async fn remember<T, F, Fut>(&self, method: &str, key: CacheKey, compute: F) -> RecallResult<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = RecallResult<T>> + Send,
    {
        self.decorator
            .remember(
                self.reads_cached(),
                method,
                &key,
                self.settings.ttl(),
                &self.remember_tags,
                compute,
            )
            .await
    }

    /// Run a write, then invalidate. The write's own result is returned
    /// unchanged whatever invalidation does.
    async fn invalidating<T>(&self, method: &str, result: RecallResult<T>) -> RecallResult<T> {
        match self.reset_repository_cache().await {
            Ok(Some(report)) => tracing::debug!(
                repository = %self.inner.identity(),
                method,
                strategy = %report.strategy,
                evicted = report.evicted,
                "Repository cache invalidated"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(
                repository = %self.inner.identity(),
                method,
                error = %e,
                "Repository cache invalidation failed"
            ),
        }
        result
    }

    fn resolve_window(&self, per_page: Option<usize>, page: Option<usize>) -> (usize, usize) {
        (
            per_page.filter(|p| *p > 0).unwrap_or_else(|| self.inner.per_page()),
            page.filter(|p| *p > 0).unwrap_or(1),
        )
    }

    fn not_found(&self, id: impl ToString) -> RecallError {
        RecallError::Storage(StorageError::NotFound {
            entity: self.inner.identity().to_string(),
            id: id.to_string(),
        })
    }
}

fn columns_arg(columns: &Columns) -> Value {
    serde_json::to_value(columns).unwrap_or(Value::Null)
}

#[async_trait]
impl<R: Repository> Repository for CachingRepository<R> {
    type Entity = R::Entity;

    fn identity(&self) -> &str {
        self.inner.identity()
    }

    fn criteria(&self) -> &CriteriaStack {
        self.inner.criteria()
    }

    fn criteria_mut(&mut self) -> &mut CriteriaStack {
        self.inner.criteria_mut()
    }

    fn searchable_columns(&self) -> &[String] {
        self.inner.searchable_columns()
    }

    fn per_page(&self) -> usize {
        self.inner.per_page()
    }

    async fn get(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>> {
        let key = self.cache_key("get", &[columns_arg(columns)]);
        self.remember("get", key, || self.inner.get(columns)).await
    }

    async fn all(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>> {
        let key = self.cache_key("all", &[columns_arg(columns)]);
        self.remember("all", key, || self.inner.all(columns)).await
    }

    async fn first(&self, columns: &Columns) -> RecallResult<Option<Self::Entity>> {
        let key = self.cache_key("first", &[columns_arg(columns)]);
        self.remember("first", key, || self.inner.first(columns)).await
    }

    async fn first_or_fail(&self, columns: &Columns) -> RecallResult<Self::Entity> {
        self.first(columns)
            .await?
            .ok_or_else(|| self.not_found("first"))
    }

    async fn find(&self, id: &Value, columns: &Columns) -> RecallResult<Option<Self::Entity>> {
        let key = self.cache_key("find", &[id.clone(), columns_arg(columns)]);
        self.remember("find", key, || self.inner.find(id, columns)).await
    }

    async fn find_or_fail(&self, id: &Value, columns: &Columns) -> RecallResult<Self::Entity> {
        self.find(id, columns)
            .await?
            .ok_or_else(|| self.not_found(id))
    }

    async fn find_where(
        &self,
        conditions: &[FilterExpr],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let conditions_arg = serde_json::to_value(conditions).unwrap_or(Value::Null);
        let key = self.cache_key("find_where", &[conditions_arg, columns_arg(columns)]);
        self.remember("find_where", key, || {
            self.inner.find_where(conditions, columns)
        })
        .await
    }

    async fn find_where_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let key = self.cache_key(
            "find_where_in",
            &[json!(field), json!(values), columns_arg(columns)],
        );
        self.remember("find_where_in", key, || {
            self.inner.find_where_in(field, values, columns)
        })
        .await
    }

    async fn find_where_not_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let key = self.cache_key(
            "find_where_not_in",
            &[json!(field), json!(values), columns_arg(columns)],
        );
        self.remember("find_where_not_in", key, || {
            self.inner.find_where_not_in(field, values, columns)
        })
        .await
    }

    async fn pluck(&self, column: &str, key: Option<&str>) -> RecallResult<Plucked> {
        let cache_key = self.cache_key("pluck", &[json!(column), json!(key)]);
        self.remember("pluck", cache_key, || self.inner.pluck(column, key))
            .await
    }

    async fn paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<Page<Self::Entity>> {
        let (per_page, page) = self.resolve_window(per_page, page);
        let key = self.cache_key(
            "paginate",
            &[json!(per_page), json!(page), columns_arg(columns)],
        );
        self.remember("paginate", key, || {
            self.inner.paginate(Some(per_page), Some(page), columns)
        })
        .await
    }

    async fn simple_paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<SimplePage<Self::Entity>> {
        let (per_page, page) = self.resolve_window(per_page, page);
        let key = self.cache_key(
            "simple_paginate",
            &[json!(per_page), json!(page), columns_arg(columns)],
        );
        self.remember("simple_paginate", key, || {
            self.inner.simple_paginate(Some(per_page), Some(page), columns)
        })
        .await
    }

    async fn get_by_criteria(
        &self,
        criterion: Arc<dyn Criterion>,
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let mut stack = CriteriaStack::new();
        stack.push_arc(Arc::clone(&criterion));
        let key = self
            .keys
            .generate("get_by_criteria", &[columns_arg(columns)], &stack);
        self.remember("get_by_criteria", key, || {
            self.inner.get_by_criteria(criterion, columns)
        })
        .await
    }

    async fn create(&self, attributes: Attributes) -> RecallResult<Self::Entity> {
        let result = self.inner.create(attributes).await;
        self.invalidating("create", result).await
    }

    async fn update(&self, attributes: Attributes, id: &Value) -> RecallResult<Self::Entity> {
        let result = self.inner.update(attributes, id).await;
        self.invalidating("update", result).await
    }

    async fn delete(&self, id: &Value) -> RecallResult<bool> {
        let result = self.inner.delete(id).await;
        self.invalidating("delete", result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_backend::InMemoryCacheBackend;
    use crate::repository::QueryRepository;
    use crate::MockQueryEngine;
    use recall_core::{FieldValueSet, SortDirection};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Project {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        status: Option<String>,
    }

    type Engine = MockQueryEngine<Project>;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("attributes must be an object"),
        }
    }

    fn seeded(count: usize) -> Arc<Engine> {
        let engine = Arc::new(Engine::new("projects"));
        for i in 0..count {
            let status = if i % 2 == 0 { "active" } else { "archived" };
            engine
                .seed(attrs(json!({"name": format!("project-{:02}", i), "status": status})))
                .unwrap();
        }
        engine
    }

    fn caching(
        engine: Arc<Engine>,
        backend: Arc<dyn CacheBackend>,
    ) -> CachingRepository<QueryRepository<Engine>> {
        CachingRepository::new(QueryRepository::new("projects", engine), CacheSettings::default())
            .unwrap()
            .with_backend(backend)
    }

    #[test]
    fn test_new_rejects_zero_duration() {
        let engine = seeded(0);
        let result = CachingRepository::new(
            QueryRepository::new("projects", engine),
            CacheSettings::new(true, 0),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_repeated_read_executes_once() {
        let engine = seeded(3);
        let repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));

        let first = repo.get(&Columns::All).await.unwrap();
        let second = repo.get(&Columns::All).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.reads(), 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_for_both_strategies() {
        let backends: [Arc<dyn CacheBackend>; 2] = [
            Arc::new(InMemoryCacheBackend::new()),
            Arc::new(InMemoryCacheBackend::with_tags()),
        ];
        for backend in backends {
            let engine = seeded(2);
            let repo = caching(engine.clone(), backend);

            assert_eq!(repo.get(&Columns::All).await.unwrap().len(), 2);
            repo.create(attrs(json!({"name": "fresh"}))).await.unwrap();
            assert_eq!(repo.get(&Columns::All).await.unwrap().len(), 3);
            assert_eq!(engine.reads(), 2);
        }
    }

    #[tokio::test]
    async fn test_failed_write_still_invalidates_and_returns_error() {
        let engine = seeded(1);
        let backend = Arc::new(InMemoryCacheBackend::with_tags());
        let repo = caching(engine.clone(), backend.clone());

        repo.get(&Columns::All).await.unwrap();
        let err = repo
            .update(attrs(json!({"name": "x"})), &json!(99))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        repo.get(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 2);
    }

    #[tokio::test]
    async fn test_skip_cache_bypasses_and_preserves_entry() {
        let engine = seeded(2);
        let backend = Arc::new(InMemoryCacheBackend::new());
        let mut repo = caching(engine.clone(), backend.clone());

        repo.get(&Columns::All).await.unwrap();
        let key = repo.cache_key("get", &[columns_arg(&Columns::All)]);
        let stored = backend.get(key.as_str()).await.unwrap();

        repo.skip_cache(true);
        for _ in 0..3 {
            repo.get(&Columns::All).await.unwrap();
        }
        assert_eq!(engine.reads(), 4);
        assert_eq!(backend.get(key.as_str()).await.unwrap(), stored);

        repo.skip_cache(false);
        repo.get(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 4);
    }

    #[tokio::test]
    async fn test_disable_cache_bypasses() {
        let engine = seeded(1);
        let backend = Arc::new(InMemoryCacheBackend::new());
        let mut repo = caching(engine.clone(), backend.clone());
        repo.disable_cache();

        repo.get(&Columns::All).await.unwrap();
        repo.get(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 2);
        assert!(backend.is_empty().await);

        repo.enable_cache();
        assert!(repo.cache_enabled());
    }

    #[tokio::test]
    async fn test_criteria_change_changes_key() {
        let engine = seeded(4);
        let mut repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::with_tags()));

        repo.push_criteria(FieldValueSet::single("status", "active"));
        let active = repo.get(&Columns::All).await.unwrap();

        repo.reset_criteria()
            .push_criteria(FieldValueSet::single("status", "archived"));
        let archived = repo.get(&Columns::All).await.unwrap();

        assert_eq!(engine.reads(), 2);
        assert!(active.iter().all(|p| p.status.as_deref() == Some("active")));
        assert!(archived.iter().all(|p| p.status.as_deref() == Some("archived")));
    }

    #[tokio::test]
    async fn test_pages_are_cached_separately() {
        let engine = seeded(20);
        let repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));

        let one = repo.paginate(Some(15), Some(1), &Columns::All).await.unwrap();
        let two = repo.paginate(Some(15), Some(2), &Columns::All).await.unwrap();
        assert_ne!(one.items, two.items);

        // Defaults resolve before keying.
        repo.paginate(None, None, &Columns::All).await.unwrap();
        assert_eq!(one.current_page, 1);
        assert_eq!(engine.reads(), 4);
    }

    #[tokio::test]
    async fn test_not_found_is_never_cached() {
        let engine = seeded(0);
        let repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));

        assert!(repo.find_or_fail(&json!(1), &Columns::All).await.unwrap_err().is_not_found());

        // Seeding bypasses the repository, so nothing is invalidated.
        engine.seed(attrs(json!({"name": "late"}))).unwrap();
        assert!(repo.find(&json!(1), &Columns::All).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_all_is_keyed_by_stack() {
        let engine = seeded(2);
        let mut repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));

        repo.all(&Columns::All).await.unwrap();
        repo.all(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 1);

        repo.safe_order_by("name", SortDirection::Desc);
        let unordered_key = repo
            .keys
            .generate("all", &[columns_arg(&Columns::All)], &CriteriaStack::new());
        assert_ne!(repo.cache_key("all", &[columns_arg(&Columns::All)]), unordered_key);

        // The stack does not filter `all`, only its key.
        assert_eq!(repo.all(&Columns::All).await.unwrap().len(), 2);
        assert_eq!(engine.reads(), 2);
    }

    #[tokio::test]
    async fn test_get_by_criteria_keys_on_given_criterion() {
        let engine = seeded(4);
        let mut repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));
        let criterion: Arc<dyn Criterion> = Arc::new(FieldValueSet::single("status", "active"));

        repo.get_by_criteria(criterion.clone(), &Columns::All).await.unwrap();
        repo.push_criteria(FieldValueSet::single("status", "archived"));
        let found = repo.get_by_criteria(criterion, &Columns::All).await.unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(engine.reads(), 1);
    }

    #[tokio::test]
    async fn test_extra_tags_are_attached_and_flushed() {
        use crate::cache::traits::TaggableCache;

        let engine = seeded(1);
        let backend = Arc::new(InMemoryCacheBackend::with_tags());
        let repo = caching(engine.clone(), backend.clone())
            .with_remember_tags(["dashboard"])
            .with_flush_tags(["dashboard"]);

        repo.get(&Columns::All).await.unwrap();
        assert_eq!(backend.flush_tags(&["dashboard".to_string()]).await.unwrap(), 1);

        repo.get(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 2);

        let report = repo.reset_repository_cache().await.unwrap().unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.evicted, 1);
    }

    #[tokio::test]
    async fn test_detached_backend_computes_directly() {
        let engine = seeded(1);
        let mut repo = caching(engine.clone(), Arc::new(InMemoryCacheBackend::new()));
        repo.set_cache_backend(None);

        repo.get(&Columns::All).await.unwrap();
        repo.get(&Columns::All).await.unwrap();
        assert_eq!(engine.reads(), 2);
        assert!(repo.cache_stats().await.unwrap().is_none());
        assert!(repo.reset_repository_cache().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_duration_overrides_ttl() {
        let engine = seeded(0);
        let repo = caching(engine, Arc::new(InMemoryCacheBackend::new()))
            .with_duration(60)
            .unwrap();
        assert_eq!(repo.cache_duration(), Duration::from_secs(3600));
    }
}
