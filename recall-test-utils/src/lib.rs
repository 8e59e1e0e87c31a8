//! recall test utilities
//!
//! Shared test infrastructure for the recall workspace:
//! - A `Project` record and seeded in-memory engines
//! - A cache backend with switchable faults
//! - Proptest generators for criteria and read arguments
//! - Assertions over `RecallResult`

pub use recall_core::{
    Attributes, CacheError, CacheSettings, Columns, ConfigError, CriteriaStack, Criterion,
    ExactValue, FieldValueSet, InCategory, OfType, OrderBy, RecallError, RecallResult, Search,
    SortDirection, Status, StorageError,
};
pub use recall_storage::{
    CacheBackend, CacheStats, CachingRepository, InMemoryCacheBackend, MockQueryEngine,
    QueryRepository, Repository, TaggableCache,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

// ============================================================================
// RECORD FIXTURE
// ============================================================================

/// Record used across the workspace tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default, rename = "type")]
    pub project_type: Option<String>,
}

pub type ProjectEngine = MockQueryEngine<Project>;
pub type ProjectRepository = QueryRepository<ProjectEngine>;
pub type CachedProjects = CachingRepository<ProjectRepository>;

// ============================================================================
// FAULTY BACKEND
// ============================================================================

/// In-memory backend whose operations can be made to fail one class at a
/// time. With no faults set it behaves like the backend it wraps.
#[derive(Debug, Default)]
pub struct FaultyCacheBackend {
    inner: InMemoryCacheBackend,
    fail_get: AtomicBool,
    /// Covers `put` and `forever`.
    fail_put: AtomicBool,
    fail_register: AtomicBool,
    /// Forgets and set takes fail for keys containing this pattern.
    fail_forget: RwLock<Option<String>>,
}

impl FaultyCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every get, put, registration and forget fails.
    pub fn broken() -> Self {
        let backend = Self::new();
        backend.set_fail_get(true);
        backend.set_fail_put(true);
        backend.set_fail_register(true);
        backend.set_fail_forget(true);
        backend
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    /// Fail set appends, which is how repositories register keys.
    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_forget(&self, fail: bool) {
        self.set_forget_pattern(fail.then(String::new));
    }

    /// Fail forgets only for keys containing `pattern`.
    pub fn fail_forget_matching(&self, pattern: impl Into<String>) {
        self.set_forget_pattern(Some(pattern.into()));
    }

    fn set_forget_pattern(&self, pattern: Option<String>) {
        if let Ok(mut current) = self.fail_forget.write() {
            *current = pattern;
        }
    }

    fn forget_fails(&self, key: &str) -> bool {
        self.fail_forget
            .read()
            .map(|pattern| pattern.as_deref().is_some_and(|p| key.contains(p)))
            .unwrap_or(false)
    }

    /// The wrapped store, for inspecting what was written.
    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> RecallResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(RecallError::Cache(CacheError::BackendUnavailable {
                reason: format!("injected {} failure", operation),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for FaultyCacheBackend {
    async fn get(&self, key: &str) -> RecallResult<Option<Vec<u8>>> {
        self.check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RecallResult<()> {
        self.check(&self.fail_put, "put")?;
        self.inner.put(key, value, ttl).await
    }

    async fn forever(&self, key: &str, value: Vec<u8>) -> RecallResult<()> {
        self.check(&self.fail_put, "forever")?;
        self.inner.forever(key, value).await
    }

    async fn forget(&self, key: &str) -> RecallResult<bool> {
        if self.forget_fails(key) {
            return Err(RecallError::Cache(CacheError::BackendUnavailable {
                reason: "injected forget failure".to_string(),
            }));
        }
        self.inner.forget(key).await
    }

    async fn add_to_set(&self, key: &str, member: &str) -> RecallResult<bool> {
        self.check(&self.fail_register, "add_to_set")?;
        self.inner.add_to_set(key, member).await
    }

    async fn take_set(&self, key: &str) -> RecallResult<Vec<String>> {
        if self.forget_fails(key) {
            return Err(RecallError::Cache(CacheError::BackendUnavailable {
                reason: "injected take_set failure".to_string(),
            }));
        }
        self.inner.take_set(key).await
    }

    async fn stats(&self) -> RecallResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for criteria stacks and read arguments.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Column names as they appear in tests.
    pub fn arb_column() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("id".to_string()),
            Just("name".to_string()),
            Just("status".to_string()),
            Just("category_id".to_string()),
            "[a-z_]{1,12}",
        ]
    }

    /// Scalar JSON values.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    /// Positional read arguments.
    pub fn arb_args() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(arb_scalar(), 0..4)
    }

    pub fn arb_sort_direction() -> impl Strategy<Value = SortDirection> {
        prop_oneof![Just(SortDirection::Asc), Just(SortDirection::Desc)]
    }

    /// Any shipped criterion.
    pub fn arb_criterion() -> BoxedStrategy<Arc<dyn Criterion>> {
        prop_oneof![
            (arb_column(), arb_scalar())
                .prop_map(|(c, v)| Arc::new(ExactValue::new(c, v)) as Arc<dyn Criterion>),
            (arb_column(), prop::collection::vec(arb_scalar(), 0..4))
                .prop_map(|(f, ids)| Arc::new(FieldValueSet::new(f, ids)) as Arc<dyn Criterion>),
            (prop::collection::vec(arb_column(), 0..3), "[a-z]{0,8}")
                .prop_map(|(cols, q)| Arc::new(Search::new(cols, q)) as Arc<dyn Criterion>),
            (arb_column(), arb_sort_direction())
                .prop_map(|(c, d)| Arc::new(OrderBy::new(c, d)) as Arc<dyn Criterion>),
            prop::collection::vec("[a-z]{1,8}", 0..3)
                .prop_map(|s| Arc::new(Status::new(s)) as Arc<dyn Criterion>),
            prop::collection::vec(1i64..100, 0..3)
                .prop_map(|ids| Arc::new(InCategory::new(ids)) as Arc<dyn Criterion>),
            "[a-z]{0,8}".prop_map(|t| Arc::new(OfType::new(t)) as Arc<dyn Criterion>),
        ]
        .boxed()
    }

    /// Ordered criteria for a stack.
    pub fn arb_criteria() -> impl Strategy<Value = Vec<Arc<dyn Criterion>>> {
        prop::collection::vec(arb_criterion(), 0..5)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built repositories and stacks for common scenarios.

    use super::*;
    use serde_json::{json, Value};

    /// Attribute map for a project row.
    pub fn project_attributes(name: &str, status: &str) -> Attributes {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), json!(name));
        attributes.insert("status".to_string(), json!(status));
        attributes
    }

    /// An empty `projects` engine.
    pub fn empty_engine() -> Arc<ProjectEngine> {
        Arc::new(ProjectEngine::new("projects"))
    }

    /// A `projects` engine holding `count` rows, alternating between
    /// `active` and `archived` and spread over three categories.
    pub fn seeded_engine(count: usize) -> RecallResult<Arc<ProjectEngine>> {
        let engine = empty_engine();
        for i in 0..count {
            let status = if i % 2 == 0 { "active" } else { "archived" };
            let mut attributes = project_attributes(&format!("project-{:03}", i), status);
            attributes.insert("category_id".to_string(), json!((i % 3) as i64 + 1));
            engine.seed(attributes)?;
        }
        Ok(engine)
    }

    pub fn project_repository(engine: Arc<ProjectEngine>) -> ProjectRepository {
        QueryRepository::new("projects", engine).with_searchable(["name"])
    }

    /// Cached `projects` repository with default settings over `backend`.
    pub fn cached_projects(
        engine: Arc<ProjectEngine>,
        backend: Arc<dyn CacheBackend>,
    ) -> RecallResult<CachedProjects> {
        Ok(CachingRepository::new(project_repository(engine), CacheSettings::default())?
            .with_backend(backend))
    }

    /// A stack holding `criteria` in order.
    pub fn stack_of(criteria: &[Arc<dyn Criterion>]) -> CriteriaStack {
        let mut stack = CriteriaStack::new();
        for criterion in criteria {
            stack.push_arc(Arc::clone(criterion));
        }
        stack
    }

    /// The `Columns::All` argument as it is folded into keys.
    pub fn all_columns_arg() -> Value {
        serde_json::to_value(Columns::All).unwrap_or(Value::Null)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over `RecallResult` values.

    use super::*;

    /// Assert that a RecallResult is a NotFound storage error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RecallResult<T>) {
        match result {
            Err(RecallError::Storage(StorageError::NotFound { .. })) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a RecallResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RecallResult<T>) {
        match result {
            Err(RecallError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a RecallResult is a Cache error.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &RecallResult<T>) {
        match result {
            Err(RecallError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }
}
