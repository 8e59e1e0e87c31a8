//! Repository interface and the criteria-applying base repository.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use recall_core::{
    Attributes, Columns, CriteriaStack, Criterion, CriterionKind, FilterExpr, OrderBy,
    RecallError, RecallResult, Search, SortDirection, StorageError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheableEntity;
use crate::QueryEngine;

/// Page size used when a caller does not pass one.
pub const DEFAULT_PER_PAGE: usize = 15;

/// One page of a length-aware pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub per_page: usize,
    pub current_page: usize,
    pub last_page: usize,
}

impl<T> Page<T> {
    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One page of a pagination that does not count the full result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplePage<T> {
    pub items: Vec<T>,
    pub per_page: usize,
    pub current_page: usize,
    pub has_more: bool,
}

/// Result of a pluck: bare values, or values keyed by another column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Plucked {
    Values(Vec<Value>),
    Keyed(BTreeMap<String, Value>),
}

/// A named request filter that translates a request value into criteria.
pub trait RepositoryFilter: Send + Sync {
    fn apply(&self, criteria: &mut CriteriaStack, value: &Value);
}

/// Read and write surface of a repository.
///
/// Reads see the repository's criteria stack unless stated otherwise; writes
/// never do. Implemented by [`QueryRepository`] and by the caching decorator
/// that wraps it.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Record type served by this repository.
    type Entity: CacheableEntity;

    /// Stable repository name. Cache keys and tags are derived from it.
    fn identity(&self) -> &str;

    fn criteria(&self) -> &CriteriaStack;

    fn criteria_mut(&mut self) -> &mut CriteriaStack;

    /// Columns `safe_search` searches across.
    fn searchable_columns(&self) -> &[String] {
        &[]
    }

    /// Page size used when `paginate` gets none.
    fn per_page(&self) -> usize {
        DEFAULT_PER_PAGE
    }

    /// Records matching the criteria stack.
    async fn get(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>>;

    /// Every record, ignoring the criteria stack.
    async fn all(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>>;

    async fn first(&self, columns: &Columns) -> RecallResult<Option<Self::Entity>>;

    /// Like `first`, but a missing record is `StorageError::NotFound`.
    async fn first_or_fail(&self, columns: &Columns) -> RecallResult<Self::Entity>;

    async fn find(&self, id: &Value, columns: &Columns) -> RecallResult<Option<Self::Entity>>;

    /// Like `find`, but a missing record is `StorageError::NotFound`.
    async fn find_or_fail(&self, id: &Value, columns: &Columns) -> RecallResult<Self::Entity>;

    /// Records matching the stack plus every given condition.
    async fn find_where(
        &self,
        conditions: &[FilterExpr],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>>;

    async fn find_where_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>>;

    async fn find_where_not_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>>;

    /// Values of one column, optionally keyed by another.
    async fn pluck(&self, column: &str, key: Option<&str>) -> RecallResult<Plucked>;

    async fn paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<Page<Self::Entity>>;

    async fn simple_paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<SimplePage<Self::Entity>>;

    /// Records matching only `criterion`, on a fresh stack.
    async fn get_by_criteria(
        &self,
        criterion: Arc<dyn Criterion>,
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>>;

    async fn create(&self, attributes: Attributes) -> RecallResult<Self::Entity>;

    async fn update(&self, attributes: Attributes, id: &Value) -> RecallResult<Self::Entity>;

    async fn delete(&self, id: &Value) -> RecallResult<bool>;

    /// Shorthand for `find_where` with a single equality.
    async fn find_by_field(
        &self,
        field: &str,
        value: Value,
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        self.find_where(&[FilterExpr::eq(field, value)], columns)
            .await
    }

    fn push_criteria<C: Criterion + 'static>(&mut self, criterion: C) -> &mut Self
    where
        Self: Sized,
    {
        self.criteria_mut().push(criterion);
        self
    }

    fn remove_criteria<C: CriterionKind>(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.criteria_mut().remove::<C>();
        self
    }

    fn remove_criteria_kind(&mut self, kind: &str) -> &mut Self
    where
        Self: Sized,
    {
        self.criteria_mut().remove_kind(kind);
        self
    }

    fn reset_criteria(&mut self) -> &mut Self
    where
        Self: Sized,
    {
        self.criteria_mut().reset();
        self
    }

    fn skip_criteria(&mut self, skip: bool) -> &mut Self
    where
        Self: Sized,
    {
        self.criteria_mut().set_skipped(skip);
        self
    }

    /// Run every registered filter named in `request`, then `safe_search`.
    fn apply_filters(
        &mut self,
        request: &BTreeMap<String, Value>,
        filters: &BTreeMap<String, Box<dyn RepositoryFilter>>,
    ) -> &mut Self
    where
        Self: Sized,
    {
        for (name, value) in request {
            if let Some(filter) = filters.get(name) {
                filter.apply(self.criteria_mut(), value);
            }
        }
        self.safe_search(request)
    }

    /// Push a `Search` over the searchable columns when `request["search"]`
    /// is a non-empty string and there is something to search.
    fn safe_search(&mut self, request: &BTreeMap<String, Value>) -> &mut Self
    where
        Self: Sized,
    {
        let needle = match request.get("search").and_then(Value::as_str) {
            Some(needle) if !needle.is_empty() => needle.to_string(),
            _ => return self,
        };
        if self.searchable_columns().is_empty() {
            return self;
        }

        let search = Search::new(self.searchable_columns().to_vec(), needle);
        self.criteria_mut().push(search);
        self
    }

    /// Order by `column` unless it is blank.
    fn safe_order_by(&mut self, column: &str, direction: SortDirection) -> &mut Self
    where
        Self: Sized,
    {
        if column.trim().is_empty() {
            return self;
        }
        self.criteria_mut().push(OrderBy::new(column, direction));
        self
    }
}

// ============================================================================
// QUERY REPOSITORY
// ============================================================================

/// Repository that applies its criteria stack to a fresh query per read and
/// hands the query to a [`QueryEngine`].
pub struct QueryRepository<Q: QueryEngine> {
    identity: String,
    engine: Arc<Q>,
    criteria: CriteriaStack,
    searchable: Vec<String>,
    per_page: usize,
}

impl<Q: QueryEngine> QueryRepository<Q> {
    pub fn new(identity: impl Into<String>, engine: Arc<Q>) -> Self {
        Self {
            identity: identity.into(),
            engine,
            criteria: CriteriaStack::new(),
            searchable: Vec::new(),
            per_page: DEFAULT_PER_PAGE,
        }
    }

    /// Columns used by `safe_search`.
    pub fn with_searchable<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.searchable = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Default page size. Zero falls back to [`DEFAULT_PER_PAGE`].
    pub fn with_per_page(mut self, per_page: usize) -> Self {
        self.per_page = if per_page == 0 { DEFAULT_PER_PAGE } else { per_page };
        self
    }

    pub fn engine(&self) -> &Arc<Q> {
        &self.engine
    }

    fn not_found(&self, id: impl ToString) -> RecallError {
        RecallError::Storage(StorageError::NotFound {
            entity: self.engine.entity_name().to_string(),
            id: id.to_string(),
        })
    }

    fn window(&self, per_page: Option<usize>, page: Option<usize>) -> (usize, usize) {
        let per_page = per_page.filter(|p| *p > 0).unwrap_or(self.per_page);
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        (per_page, page)
    }
}

/// Row offset of `page`, or `None` when it does not fit in `usize`.
fn page_offset(per_page: usize, page: usize) -> Option<usize> {
    page.saturating_sub(1).checked_mul(per_page)
}

#[async_trait]
impl<Q: QueryEngine> Repository for QueryRepository<Q> {
    type Entity = Q::Entity;

    fn identity(&self) -> &str {
        &self.identity
    }

    fn criteria(&self) -> &CriteriaStack {
        &self.criteria
    }

    fn criteria_mut(&mut self) -> &mut CriteriaStack {
        &mut self.criteria
    }

    fn searchable_columns(&self) -> &[String] {
        &self.searchable
    }

    fn per_page(&self) -> usize {
        self.per_page
    }

    async fn get(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>> {
        let query = self.criteria.build_query();
        self.engine.execute(&query, columns).await
    }

    async fn all(&self, columns: &Columns) -> RecallResult<Vec<Self::Entity>> {
        self.engine
            .execute(&recall_core::Query::new(), columns)
            .await
    }

    async fn first(&self, columns: &Columns) -> RecallResult<Option<Self::Entity>> {
        let mut query = self.criteria.build_query();
        query.limit(1);
        Ok(self.engine.execute(&query, columns).await?.into_iter().next())
    }

    async fn first_or_fail(&self, columns: &Columns) -> RecallResult<Self::Entity> {
        self.first(columns)
            .await?
            .ok_or_else(|| self.not_found("first"))
    }

    async fn find(&self, id: &Value, columns: &Columns) -> RecallResult<Option<Self::Entity>> {
        let query = self.criteria.build_query();
        self.engine.find_by_id(&query, id, columns).await
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
        let mut query = self.criteria.build_query();
        for condition in conditions {
            query.filter(condition.clone());
        }
        self.engine.execute(&query, columns).await
    }

    async fn find_where_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let mut query = self.criteria.build_query();
        query.where_in(field, values.to_vec());
        self.engine.execute(&query, columns).await
    }

    async fn find_where_not_in(
        &self,
        field: &str,
        values: &[Value],
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let mut query = self.criteria.build_query();
        query.where_not_in(field, values.to_vec());
        self.engine.execute(&query, columns).await
    }

    async fn pluck(&self, column: &str, key: Option<&str>) -> RecallResult<Plucked> {
        let query = self.criteria.build_query();
        let mut selected = vec![column.to_string()];
        if let Some(key) = key {
            selected.push(key.to_string());
        }
        let records = self.engine.execute(&query, &Columns::only(selected)).await?;

        let rows = records
            .iter()
            .map(|record| {
                serde_json::to_value(record).map_err(|e| {
                    RecallError::Storage(StorageError::QueryFailed {
                        entity: self.engine.entity_name().to_string(),
                        reason: e.to_string(),
                    })
                })
            })
            .collect::<RecallResult<Vec<Value>>>()?;

        let value_of = |row: &Value| row.get(column).cloned().unwrap_or(Value::Null);

        Ok(match key {
            None => Plucked::Values(rows.iter().map(value_of).collect()),
            Some(key) => Plucked::Keyed(
                rows.iter()
                    .map(|row| {
                        let k = match row.get(key) {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        };
                        (k, value_of(row))
                    })
                    .collect(),
            ),
        })
    }

    async fn paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<Page<Self::Entity>> {
        let (per_page, page) = self.window(per_page, page);
        let mut query = self.criteria.build_query();
        let total = self.engine.count(&query).await?;

        // A window past the addressable range holds no rows.
        let items = match page_offset(per_page, page) {
            Some(offset) => {
                query.limit(per_page).offset(offset);
                self.engine.execute(&query, columns).await?
            }
            None => Vec::new(),
        };

        let last_page = (total as usize).div_ceil(per_page).max(1);
        Ok(Page {
            items,
            total,
            per_page,
            current_page: page,
            last_page,
        })
    }

    async fn simple_paginate(
        &self,
        per_page: Option<usize>,
        page: Option<usize>,
        columns: &Columns,
    ) -> RecallResult<SimplePage<Self::Entity>> {
        let (per_page, page) = self.window(per_page, page);
        let Some(offset) = page_offset(per_page, page) else {
            return Ok(SimplePage {
                items: Vec::new(),
                per_page,
                current_page: page,
                has_more: false,
            });
        };

        let mut query = self.criteria.build_query();
        query.limit(per_page.saturating_add(1)).offset(offset);

        let mut items = self.engine.execute(&query, columns).await?;
        let has_more = items.len() > per_page;
        items.truncate(per_page);

        Ok(SimplePage {
            items,
            per_page,
            current_page: page,
            has_more,
        })
    }

    async fn get_by_criteria(
        &self,
        criterion: Arc<dyn Criterion>,
        columns: &Columns,
    ) -> RecallResult<Vec<Self::Entity>> {
        let mut stack = CriteriaStack::new();
        stack.push_arc(criterion);
        self.engine.execute(&stack.build_query(), columns).await
    }

    async fn create(&self, attributes: Attributes) -> RecallResult<Self::Entity> {
        self.engine.insert(attributes).await
    }

    async fn update(&self, attributes: Attributes, id: &Value) -> RecallResult<Self::Entity> {
        self.engine.update(id, attributes).await
    }

    async fn delete(&self, id: &Value) -> RecallResult<bool> {
        self.engine.delete(id).await?;
        Ok(true)
    }
}
