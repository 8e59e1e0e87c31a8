//! The query value criteria mutate.
//!
//! A `Query` is plain data: predicates, ordering and a window. Criteria only
//! ever see this type, never each other, and query engines translate it into
//! their own execution plan.

use crate::filter::{compare_values, FilterExpr, Predicate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Sort direction for ordered reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse `asc`/`desc`, case-insensitive. Anything else sorts ascending.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }
}

/// Column ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClause {
    pub column: String,
    pub direction: SortDirection,
}

/// Column selection for a read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Columns {
    /// Every column (`*`).
    #[default]
    All,
    /// Only the listed columns.
    Only(Vec<String>),
}

impl Columns {
    /// Select every column.
    pub fn all() -> Self {
        Columns::All
    }

    /// Select the given columns. An empty list or one containing `*` selects all.
    pub fn only<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() || columns.iter().any(|c| c == "*") {
            Columns::All
        } else {
            Columns::Only(columns)
        }
    }

    /// Whether `column` is part of the selection.
    pub fn includes(&self, column: &str) -> bool {
        match self {
            Columns::All => true,
            Columns::Only(columns) => columns.iter().any(|c| c == column),
        }
    }
}

/// A query under construction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    predicates: Vec<Predicate>,
    ordering: Vec<OrderClause>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    /// Create an unconstrained query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single comparison.
    pub fn filter(&mut self, expr: FilterExpr) -> &mut Self {
        self.predicates.push(Predicate::Filter(expr));
        self
    }

    /// Require `field == value`.
    pub fn where_eq(&mut self, field: impl Into<String>, value: Value) -> &mut Self {
        self.filter(FilterExpr::eq(field, value))
    }

    /// Require `field` to be one of `values`.
    pub fn where_in(&mut self, field: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.filter(FilterExpr::is_in(field, values))
    }

    /// Require `field` to be none of `values`.
    pub fn where_not_in(&mut self, field: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.filter(FilterExpr::not_in(field, values))
    }

    /// Require at least one of `exprs` to hold.
    pub fn where_any(&mut self, exprs: Vec<FilterExpr>) -> &mut Self {
        self.predicates.push(Predicate::AnyOf(exprs));
        self
    }

    /// Append an ordering clause.
    pub fn order_by(&mut self, column: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.ordering.push(OrderClause {
            column: column.into(),
            direction,
        });
        self
    }

    /// Cap the number of rows returned.
    pub fn limit(&mut self, limit: usize) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` rows.
    pub fn offset(&mut self, offset: usize) -> &mut Self {
        self.offset = Some(offset);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn ordering(&self) -> &[OrderClause] {
        &self.ordering
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    /// True when no predicate, ordering or window was added.
    pub fn is_unconstrained(&self) -> bool {
        self.predicates.is_empty()
            && self.ordering.is_empty()
            && self.limit.is_none()
            && self.offset.is_none()
    }

    /// Whether a JSON row satisfies every predicate.
    pub fn matches(&self, row: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    /// Compare two rows by this query's ordering clauses.
    pub fn compare_rows(&self, a: &Value, b: &Value) -> Ordering {
        for clause in &self.ordering {
            let left = a.get(&clause.column).unwrap_or(&Value::Null);
            let right = b.get(&clause.column).unwrap_or(&Value::Null);
            let ord = compare_values(left, right).unwrap_or(Ordering::Equal);
            let ord = match clause.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
