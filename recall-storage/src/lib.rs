//! recall storage - repository seams and the read-through cache
//!
//! The query engine that actually runs queries is an external collaborator,
//! reached through [`QueryEngine`]. [`QueryRepository`] applies a criteria
//! stack to fresh queries and executes them; [`CachingRepository`] wraps any
//! [`Repository`] with remember-or-compute reads and execute-then-invalidate
//! writes.

pub mod cache;
pub mod repository;

pub use cache::{
    CacheBackend, CacheDecorator, CacheKey, CacheKeyGenerator, CacheStats, CacheableEntity,
    CachingRepository, ContextProvider, InMemoryCacheBackend, InvalidationReport,
    InvalidationStrategy, KeyRegistry, LmdbCacheBackend, LmdbCacheError, NoContext,
    StaticContext, TaggableCache,
};
pub use repository::{
    Page, Plucked, QueryRepository, Repository, RepositoryFilter, SimplePage, DEFAULT_PER_PAGE,
};

use async_trait::async_trait;
use recall_core::{
    Attributes, Columns, FilterExpr, Query, RecallError, RecallResult, StorageError,
};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

// ============================================================================
// QUERY ENGINE
// ============================================================================

/// The execution engine behind a repository.
///
/// Engines receive fully built [`Query`] values and own everything about how
/// they run: connections, timeouts, cancellation.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Record type produced by this engine.
    type Entity: CacheableEntity;

    /// Name of the stored entity, used in error messages.
    fn entity_name(&self) -> &str;

    /// Run a query and return the matching records.
    async fn execute(&self, query: &Query, columns: &Columns) -> RecallResult<Vec<Self::Entity>>;

    /// Count the records matching a query, ignoring its window.
    async fn count(&self, query: &Query) -> RecallResult<u64>;

    /// Find one record by primary key, subject to the query's predicates.
    async fn find_by_id(
        &self,
        query: &Query,
        id: &Value,
        columns: &Columns,
    ) -> RecallResult<Option<Self::Entity>>;

    /// Insert a record.
    async fn insert(&self, attributes: Attributes) -> RecallResult<Self::Entity>;

    /// Update the record with the given primary key.
    async fn update(&self, id: &Value, attributes: Attributes) -> RecallResult<Self::Entity>;

    /// Delete the record with the given primary key.
    async fn delete(&self, id: &Value) -> RecallResult<()>;
}

// ============================================================================
// MOCK ENGINE
// ============================================================================

/// In-memory query engine over JSON rows.
///
/// Evaluates [`Query`] values with the reference semantics from
/// `recall_core::filter` and counts every read it serves, which is what the
/// cache tests assert against.
pub struct MockQueryEngine<E> {
    entity_name: String,
    primary_key: String,
    rows: RwLock<Vec<Map<String, Value>>>,
    next_id: AtomicI64,
    reads: AtomicU64,
    writes: AtomicU64,
    _entity: PhantomData<fn() -> E>,
}

impl<E: CacheableEntity> MockQueryEngine<E> {
    /// Create an empty engine with `id` as primary key.
    pub fn new(entity_name: impl Into<String>) -> Self {
        Self {
            entity_name: entity_name.into(),
            primary_key: "id".to_string(),
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            _entity: PhantomData,
        }
    }

    /// Use a different primary key column.
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Insert a row without counting it as a write.
    pub fn seed(&self, attributes: Attributes) -> RecallResult<E> {
        let row = self.insert_row(attributes)?;
        self.decode(row)
    }

    /// Number of reads served (execute, count, find).
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes served (insert, update, delete).
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_row(&self, mut attributes: Attributes) -> RecallResult<Map<String, Value>> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;

        match attributes.get(&self.primary_key).and_then(Value::as_i64) {
            Some(explicit) => {
                self.next_id.fetch_max(explicit + 1, Ordering::SeqCst);
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                attributes.insert(self.primary_key.clone(), Value::from(id));
            }
        }

        let id = attributes.get(&self.primary_key).cloned().unwrap_or(Value::Null);
        if rows.iter().any(|r| self.has_id(r, &id)) {
            return Err(RecallError::Storage(StorageError::InsertFailed {
                entity: self.entity_name.clone(),
                reason: format!("Duplicate {}: {}", self.primary_key, id),
            }));
        }

        rows.push(attributes.clone());
        Ok(attributes)
    }

    fn has_id(&self, row: &Map<String, Value>, id: &Value) -> bool {
        FilterExpr::eq(self.primary_key.clone(), id.clone()).matches(&Value::Object(row.clone()))
    }

    fn decode(&self, row: Map<String, Value>) -> RecallResult<E> {
        serde_json::from_value(Value::Object(row)).map_err(|e| {
            RecallError::Storage(StorageError::QueryFailed {
                entity: self.entity_name.clone(),
                reason: e.to_string(),
            })
        })
    }

    fn project(row: &Map<String, Value>, columns: &Columns) -> Map<String, Value> {
        match columns {
            Columns::All => row.clone(),
            Columns::Only(_) => row
                .iter()
                .filter(|(k, _)| columns.includes(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn select(&self, query: &Query) -> RecallResult<Vec<Map<String, Value>>> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matched: Vec<Value> = rows
            .iter()
            .map(|r| Value::Object(r.clone()))
            .filter(|r| query.matches(r))
            .collect();

        if !query.ordering().is_empty() {
            matched.sort_by(|a, b| query.compare_rows(a, b));
        }

        let offset = query.offset_value().unwrap_or(0);
        let limit = query.limit_value().unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    fn not_found(&self, id: &Value) -> RecallError {
        RecallError::Storage(StorageError::NotFound {
            entity: self.entity_name.clone(),
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl<E: CacheableEntity> QueryEngine for MockQueryEngine<E> {
    type Entity = E;

    fn entity_name(&self) -> &str {
        &self.entity_name
    }

    async fn execute(&self, query: &Query, columns: &Columns) -> RecallResult<Vec<E>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.select(query)?
            .iter()
            .map(|row| self.decode(Self::project(row, columns)))
            .collect()
    }

    async fn count(&self, query: &Query) -> RecallResult<u64> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .iter()
            .filter(|r| query.matches(&Value::Object((*r).clone())))
            .count() as u64)
    }

    async fn find_by_id(
        &self,
        query: &Query,
        id: &Value,
        columns: &Columns,
    ) -> RecallResult<Option<E>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let found = self
            .select(query)?
            .into_iter()
            .find(|row| self.has_id(row, id));

        found
            .map(|row| self.decode(Self::project(&row, columns)))
            .transpose()
    }

    async fn insert(&self, attributes: Attributes) -> RecallResult<E> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let row = self.insert_row(attributes)?;
        self.decode(row)
    }

    async fn update(&self, id: &Value, attributes: Attributes) -> RecallResult<E> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let updated = {
            let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
            let row = rows
                .iter_mut()
                .find(|r| self.has_id(r, id))
                .ok_or_else(|| self.not_found(id))?;
            for (field, value) in attributes {
                if field != self.primary_key {
                    row.insert(field, value);
                }
            }
            row.clone()
        };
        self.decode(updated)
    }

    async fn delete(&self, id: &Value) -> RecallResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        let position = rows
            .iter()
            .position(|r| self.has_id(r, id))
            .ok_or_else(|| self.not_found(id))?;
        rows.remove(position);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use recall_core::{CriteriaStack, OrderBy, SortDirection, Status};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        name: String,
        #[serde(default)]
        status: Option<String>,
    }

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("attributes must be an object"),
        }
    }

    fn seeded() -> MockQueryEngine<Widget> {
        let engine = MockQueryEngine::new("widgets");
        engine
            .seed(attrs(json!({"name": "bolt", "status": "active"})))
            .unwrap();
        engine
            .seed(attrs(json!({"name": "nut", "status": "archived"})))
            .unwrap();
        engine
            .seed(attrs(json!({"name": "axle", "status": "active"})))
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_seed_assigns_ids_without_counting() {
        let engine = seeded();
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.reads(), 0);
        assert_eq!(engine.writes(), 0);
    }

    #[tokio::test]
    async fn test_execute_applies_predicates_and_ordering() {
        let engine = seeded();
        let mut stack = CriteriaStack::new();
        stack
            .push(Status::new(["active"]))
            .push(OrderBy::new("name", SortDirection::Asc));

        let widgets = engine
            .execute(&stack.build_query(), &Columns::All)
            .await
            .unwrap();
        let names: Vec<&str> = widgets.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, vec!["axle", "bolt"]);
        assert_eq!(engine.reads(), 1);
    }

    #[tokio::test]
    async fn test_execute_projects_columns() {
        let engine = seeded();
        let widgets = engine
            .execute(&Query::new(), &Columns::only(["id"]))
            .await
            .unwrap();
        assert!(widgets.iter().all(|w| w.name.is_empty() && w.status.is_none()));
    }

    #[tokio::test]
    async fn test_count_ignores_window() {
        let engine = seeded();
        let mut query = Query::new();
        query.limit(1).offset(1);
        assert_eq!(engine.count(&query).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_find_by_id_respects_query() {
        let engine = seeded();
        let found = engine
            .find_by_id(&Query::new(), &json!(2), &Columns::All)
            .await
            .unwrap();
        assert_eq!(found.map(|w| w.name), Some("nut".to_string()));

        let mut query = Query::new();
        query.where_eq("status", json!("active"));
        let filtered = engine
            .find_by_id(&query, &json!(2), &Columns::All)
            .await
            .unwrap();
        assert!(filtered.is_none());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_are_not_found() {
        let engine = seeded();
        let err = engine
            .update(&json!(99), attrs(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = engine.delete(&json!(99)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(engine.writes(), 2);
    }

    #[tokio::test]
    async fn test_update_keeps_primary_key() {
        let engine = seeded();
        let updated = engine
            .update(&json!(1), attrs(json!({"id": 50, "name": "screw"})))
            .await
            .unwrap();
        assert_eq!(updated.id, 1);
        assert_eq!(updated.name, "screw");
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let engine = seeded();
        let err = engine
            .insert(attrs(json!({"id": 1, "name": "dupe"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RecallError::Storage(StorageError::InsertFailed { .. })
        ));
    }
}
