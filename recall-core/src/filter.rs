//! Filter expressions applied to queries
//!
//! A `FilterExpr` is a single field comparison. Criteria and `find_where*`
//! reads both express their conditions with it; engines translate it into
//! whatever their storage understands. `matches` gives the reference
//! semantics over JSON rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Contains substring (strings) or element (arrays)
    Contains,
    /// In list of values
    In,
    /// Not in list of values
    NotIn,
    /// SQL-style pattern with `%` and `_` wildcards, case-insensitive
    Like,
}

/// A single field comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a membership filter.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    /// Create an exclusion filter.
    pub fn not_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, FilterOperator::NotIn, Value::Array(values))
    }

    /// Create a pattern filter.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Like, Value::String(pattern.into()))
    }

    /// Evaluate the expression against a JSON row. Missing fields read as null.
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);

        match self.operator {
            FilterOperator::Eq => loosely_equal(actual, &self.value),
            FilterOperator::Ne => !loosely_equal(actual, &self.value),
            FilterOperator::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOperator::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Contains => match (actual, &self.value) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.iter().any(|i| loosely_equal(i, needle)),
                _ => false,
            },
            FilterOperator::In => match &self.value {
                Value::Array(candidates) => candidates.iter().any(|c| loosely_equal(actual, c)),
                _ => false,
            },
            FilterOperator::NotIn => match &self.value {
                Value::Array(candidates) => !candidates.iter().any(|c| loosely_equal(actual, c)),
                _ => true,
            },
            FilterOperator::Like => match (actual, &self.value) {
                (Value::String(text), Value::String(pattern)) => like_match(text, pattern),
                (Value::Number(n), Value::String(pattern)) => like_match(&n.to_string(), pattern),
                _ => false,
            },
        }
    }
}

/// A predicate a query carries: one comparison, or a disjunction of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// A single comparison.
    Filter(FilterExpr),
    /// Satisfied when any of the comparisons holds. Empty never matches.
    AnyOf(Vec<FilterExpr>),
}

impl Predicate {
    /// Evaluate the predicate against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Predicate::Filter(expr) => expr.matches(row),
            Predicate::AnyOf(exprs) => exprs.iter().any(|e| e.matches(row)),
        }
    }
}

/// Equality that treats integers and floats with the same value as equal.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two JSON scalars of the same family. Mixed families are unordered.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

/// Case-insensitive SQL `LIKE`: `%` matches any run, `_` matches one char.
fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.to_lowercase().chars().collect();
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();

    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;

    for p in &pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            '_' => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1];
                }
            }
            c => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && text[j - 1] == *c;
                }
            }
        }
        dp = next;
    }

    dp[text.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eq_and_missing_field() {
        let row = json!({"status": "active", "id": 3});
        assert!(FilterExpr::eq("status", json!("active")).matches(&row));
        assert!(!FilterExpr::eq("status", json!("archived")).matches(&row));
        assert!(FilterExpr::eq("missing", Value::Null).matches(&row));
        assert!(FilterExpr::eq("id", json!(3.0)).matches(&row));
    }

    #[test]
    fn test_in_and_not_in() {
        let row = json!({"category_id": 2});
        assert!(FilterExpr::is_in("category_id", vec![json!(1), json!(2)]).matches(&row));
        assert!(!FilterExpr::not_in("category_id", vec![json!(2)]).matches(&row));
        assert!(FilterExpr::not_in("category_id", vec![]).matches(&row));
        assert!(!FilterExpr::is_in("category_id", vec![]).matches(&row));
    }

    #[test]
    fn test_ordering_operators() {
        let row = json!({"score": 10});
        assert!(FilterExpr::new("score", FilterOperator::Gt, json!(5)).matches(&row));
        assert!(FilterExpr::new("score", FilterOperator::Lte, json!(10)).matches(&row));
        assert!(!FilterExpr::new("score", FilterOperator::Lt, json!("10")).matches(&row));
    }

    #[test]
    fn test_like_wildcards() {
        assert!(like_match("example.org", "%.org"));
        assert!(like_match("Example.ORG", "%.org"));
        assert!(!like_match("example.com", "%.org"));
        assert!(like_match("abc", "a_c"));
        assert!(!like_match("abbc", "a_c"));
        assert!(like_match("anything", "%"));
        assert!(like_match("", "%"));
    }

    #[test]
    fn test_any_of_predicate() {
        let row = json!({"name": "alpha", "description": "first letter"});
        let predicate = Predicate::AnyOf(vec![
            FilterExpr::like("name", "%zeta%"),
            FilterExpr::like("description", "%letter%"),
        ]);
        assert!(predicate.matches(&row));
        assert!(!Predicate::AnyOf(vec![]).matches(&row));
    }

    #[test]
    fn test_contains() {
        let row = json!({"tags": ["a", "b"], "title": "hello world"});
        assert!(FilterExpr::new("tags", FilterOperator::Contains, json!("b")).matches(&row));
        assert!(FilterExpr::new("title", FilterOperator::Contains, json!("lo w")).matches(&row));
    }
}
