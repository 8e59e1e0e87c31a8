//! Common criteria shipped with the library.
//!
//! List-valued criteria drop blank members on construction (null, `false`,
//! `0`, `""`, `"0"`, empty arrays and objects) and become no-ops when nothing
//! is left.

use super::{Criterion, CriterionKind, HashableCriterion};
use crate::digest::hex_digest;
use crate::filter::FilterExpr;
use crate::query::{Query, SortDirection};
use crate::CriterionError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Whether a value counts as blank for list-valued criteria.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty() || s == "0",
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn non_blank<I, V>(values: I) -> Vec<Value>
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    values
        .into_iter()
        .map(Into::into)
        .filter(|v| !is_blank(v))
        .collect()
}

/// Digest of a JSON value's canonical text.
fn parts_hash(parts: Value) -> String {
    hex_digest(parts.to_string().as_bytes())
}

fn structural<T: Serialize>(kind: &str, criterion: &T) -> Result<Value, CriterionError> {
    serde_json::to_value(criterion).map_err(|e| CriterionError::Unserializable {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// HASHABLE CRITERIA
// ============================================================================

/// `column = value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactValue {
    column: String,
    value: Value,
}

impl ExactValue {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl CriterionKind for ExactValue {
    const KIND: &'static str = "exact_value";
}

impl Criterion for ExactValue {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        query.where_eq(self.column.clone(), self.value.clone());
    }

    fn as_hashable(&self) -> Option<&dyn HashableCriterion> {
        Some(self)
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

impl HashableCriterion for ExactValue {
    fn cache_hash(&self) -> String {
        parts_hash(json!([self.column, self.value]))
    }
}

/// `field IN (values)`, skipped when no non-blank value remains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValueSet {
    field: String,
    ids: Vec<Value>,
}

impl FieldValueSet {
    pub fn new<I, V>(field: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            ids: non_blank(ids),
        }
    }

    /// Convenience for a single value.
    pub fn single(field: impl Into<String>, id: impl Into<Value>) -> Self {
        Self::new(field, [id.into()])
    }

    pub fn ids(&self) -> &[Value] {
        &self.ids
    }
}

impl CriterionKind for FieldValueSet {
    const KIND: &'static str = "field_value_set";
}

impl Criterion for FieldValueSet {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        if self.ids.is_empty() {
            return;
        }
        query.where_in(self.field.clone(), self.ids.clone());
    }

    fn as_hashable(&self) -> Option<&dyn HashableCriterion> {
        Some(self)
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

impl HashableCriterion for FieldValueSet {
    fn cache_hash(&self) -> String {
        parts_hash(json!([self.field, self.ids]))
    }
}

/// Case-insensitive substring search across several columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Search {
    columns: Vec<String>,
    query: String,
}

impl Search {
    pub fn new<I, S>(columns: I, query: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            query: query.into(),
        }
    }
}

impl CriterionKind for Search {
    const KIND: &'static str = "search";
}

impl Criterion for Search {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        if self.query.is_empty() || self.columns.is_empty() {
            return;
        }
        let pattern = format!("%{}%", self.query);
        query.where_any(
            self.columns
                .iter()
                .map(|column| FilterExpr::like(column.clone(), pattern.clone()))
                .collect(),
        );
    }

    fn as_hashable(&self) -> Option<&dyn HashableCriterion> {
        Some(self)
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

impl HashableCriterion for Search {
    fn cache_hash(&self) -> String {
        parts_hash(json!([self.columns, self.query]))
    }
}

/// Ordering clause as a criterion, so ordering takes part in cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    column: String,
    direction: SortDirection,
}

impl OrderBy {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }
}

impl CriterionKind for OrderBy {
    const KIND: &'static str = "order_by";
}

impl Criterion for OrderBy {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        query.order_by(self.column.clone(), self.direction);
    }

    fn as_hashable(&self) -> Option<&dyn HashableCriterion> {
        Some(self)
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

impl HashableCriterion for OrderBy {
    fn cache_hash(&self) -> String {
        parts_hash(json!([self.column, self.direction]))
    }
}

// ============================================================================
// STRUCTURALLY FINGERPRINTED CRITERIA
// ============================================================================

/// `status IN (statuses)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    statuses: Vec<Value>,
}

impl Status {
    pub fn new<I, V>(statuses: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            statuses: non_blank(statuses),
        }
    }
}

impl CriterionKind for Status {
    const KIND: &'static str = "status";
}

impl Criterion for Status {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        if self.statuses.is_empty() {
            return;
        }
        query.where_in("status", self.statuses.clone());
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

/// `category_id IN (category_ids)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InCategory {
    category_ids: Vec<Value>,
}

impl InCategory {
    pub fn new<I, V>(category_ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            category_ids: non_blank(category_ids),
        }
    }
}

impl CriterionKind for InCategory {
    const KIND: &'static str = "in_category";
}

impl Criterion for InCategory {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        if self.category_ids.is_empty() {
            return;
        }
        query.where_in("category_id", self.category_ids.clone());
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

/// `type = kind`, skipped for an empty type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfType {
    of_type: String,
}

impl OfType {
    pub fn new(of_type: impl Into<String>) -> Self {
        Self {
            of_type: of_type.into(),
        }
    }
}

impl CriterionKind for OfType {
    const KIND: &'static str = "of_type";
}

impl Criterion for OfType {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn apply(&self, query: &mut Query) {
        if self.of_type.is_empty() {
            return;
        }
        query.where_eq("type", Value::String(self.of_type.clone()));
    }

    fn fingerprint(&self) -> Result<Value, CriterionError> {
        structural(Self::KIND, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOperator, Predicate};

    #[test]
    fn test_is_blank_matches_empty_semantics() {
        for blank in [json!(null), json!(false), json!(0), json!(""), json!("0"), json!([])] {
            assert!(is_blank(&blank), "{} should be blank", blank);
        }
        for present in [json!(true), json!(1), json!("a"), json!([0])] {
            assert!(!is_blank(&present), "{} should not be blank", present);
        }
    }

    #[test]
    fn test_field_value_set_drops_blanks_and_skips_when_empty() {
        let criterion = FieldValueSet::new("owner_id", [json!(0), json!(null), json!("")]);
        assert!(criterion.ids().is_empty());

        let mut query = Query::new();
        criterion.apply(&mut query);
        assert!(query.is_unconstrained());

        let criterion = FieldValueSet::new("owner_id", [json!(3), json!(0)]);
        let mut query = Query::new();
        criterion.apply(&mut query);
        assert_eq!(
            query.predicates(),
            &[Predicate::Filter(FilterExpr::is_in("owner_id", vec![json!(3)]))]
        );
    }

    #[test]
    fn test_search_builds_disjunction() {
        let mut query = Query::new();
        Search::new(["name", "slug"], "org").apply(&mut query);

        match &query.predicates()[0] {
            Predicate::AnyOf(exprs) => {
                assert_eq!(exprs.len(), 2);
                assert!(exprs.iter().all(|e| e.operator == FilterOperator::Like));
                assert_eq!(exprs[0].value, json!("%org%"));
            }
            other => panic!("expected AnyOf, got {:?}", other),
        }

        let mut query = Query::new();
        Search::new(["name"], "").apply(&mut query);
        assert!(query.is_unconstrained());
    }

    #[test]
    fn test_cache_hash_depends_on_values() {
        let a = FieldValueSet::single("status", "active");
        let b = FieldValueSet::single("status", "archived");
        let c = FieldValueSet::single("status", "active");
        assert_ne!(a.cache_hash(), b.cache_hash());
        assert_eq!(a.cache_hash(), c.cache_hash());
    }

    #[test]
    fn test_cache_hash_is_not_ambiguous_across_field_boundaries() {
        let a = ExactValue::new("a-b", "c");
        let b = ExactValue::new("a", "b-c");
        assert_ne!(a.cache_hash(), b.cache_hash());
    }

    #[test]
    fn test_status_and_category_are_fingerprinted() {
        let status = Status::new(["active", ""]);
        assert!(status.as_hashable().is_none());
        assert_eq!(
            status.fingerprint().unwrap(),
            json!({"statuses": ["active"]})
        );

        let category = InCategory::new([1, 2]);
        assert_eq!(
            category.fingerprint().unwrap(),
            json!({"category_ids": [1, 2]})
        );
    }

    #[test]
    fn test_of_type_skips_empty() {
        let mut query = Query::new();
        OfType::new("").apply(&mut query);
        assert!(query.is_unconstrained());

        OfType::new("internal").apply(&mut query);
        assert!(query.matches(&json!({"type": "internal"})));
    }
}
