//! Query criteria and the per-repository criteria stack.
//!
//! A criterion is a small predicate object that mutates a [`Query`]. Some
//! criteria also implement [`HashableCriterion`] and hand the cache key
//! generator a digest of their own parameters; the rest are fingerprinted
//! structurally.

pub mod common;

use crate::query::Query;
use crate::CriterionError;
use std::fmt;
use std::sync::Arc;

pub use common::{ExactValue, FieldValueSet, InCategory, OfType, OrderBy, Search, Status};

/// A composable query predicate.
///
/// Implementations are immutable once constructed. `apply` must be
/// deterministic and may only touch the query it is given.
pub trait Criterion: fmt::Debug + Send + Sync {
    /// Variant tag. Removal from a stack matches on this, never on field values.
    fn kind(&self) -> &'static str;

    /// Add this criterion's constraints to the query.
    fn apply(&self, query: &mut Query);

    /// Extended hashing capability, if this criterion has one.
    fn as_hashable(&self) -> Option<&dyn HashableCriterion> {
        None
    }

    /// Structural snapshot of the criterion's parameters, used for cache keys
    /// when no explicit hash is available.
    fn fingerprint(&self) -> Result<serde_json::Value, CriterionError> {
        Err(CriterionError::Unserializable {
            kind: self.kind().to_string(),
            reason: "criterion exposes no structural fingerprint".to_string(),
        })
    }
}

/// A criterion that provides its own cache-relevant content hash.
pub trait HashableCriterion: Criterion {
    /// Short, stable digest of this criterion's parameters.
    fn cache_hash(&self) -> String;
}

/// Static variant tag, for removing criteria by type.
pub trait CriterionKind {
    const KIND: &'static str;
}

/// Ordered criteria attached to one repository instance.
///
/// No deduplication: pushing an equivalent criterion twice applies it twice.
/// Not meant to be shared between concurrently running operations; clone it
/// or build a new repository instead.
#[derive(Debug, Clone, Default)]
pub struct CriteriaStack {
    criteria: Vec<Arc<dyn Criterion>>,
    skipped: bool,
}

impl CriteriaStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a criterion.
    pub fn push<C: Criterion + 'static>(&mut self, criterion: C) -> &mut Self {
        self.criteria.push(Arc::new(criterion));
        self
    }

    /// Append an already shared criterion.
    pub fn push_arc(&mut self, criterion: Arc<dyn Criterion>) -> &mut Self {
        self.criteria.push(criterion);
        self
    }

    /// Remove every criterion whose variant tag equals `kind`.
    pub fn remove_kind(&mut self, kind: &str) -> &mut Self {
        self.criteria.retain(|c| c.kind() != kind);
        self
    }

    /// Remove every criterion of type `C`.
    pub fn remove<C: CriterionKind>(&mut self) -> &mut Self {
        self.remove_kind(C::KIND)
    }

    /// Remove every criterion of the same variant as `criterion`.
    pub fn remove_like(&mut self, criterion: &dyn Criterion) -> &mut Self {
        self.remove_kind(criterion.kind())
    }

    /// Clear the stack.
    pub fn reset(&mut self) -> &mut Self {
        self.criteria.clear();
        self
    }

    /// Ignore the stack when building queries, without clearing it.
    pub fn set_skipped(&mut self, skipped: bool) -> &mut Self {
        self.skipped = skipped;
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Every criterion on the stack, in push order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Criterion>> {
        self.criteria.iter()
    }

    /// The criteria a query built now would see: none while skipped.
    pub fn effective(&self) -> &[Arc<dyn Criterion>] {
        if self.skipped {
            &[]
        } else {
            &self.criteria
        }
    }

    /// Fold every criterion over `query`, in stack order.
    pub fn apply(&self, query: &mut Query) {
        for criterion in &self.criteria {
            criterion.apply(query);
        }
    }

    /// Build a fresh query with the effective criteria applied.
    pub fn build_query(&self) -> Query {
        let mut query = Query::new();
        if !self.skipped {
            self.apply(&mut query);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_push_keeps_duplicates() {
        let mut stack = CriteriaStack::new();
        stack
            .push(ExactValue::new("status", json!("active")))
            .push(ExactValue::new("status", json!("active")));

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.build_query().predicates().len(), 2);
    }

    #[test]
    fn test_remove_matches_kind_not_values() {
        let mut stack = CriteriaStack::new();
        stack
            .push(ExactValue::new("status", json!("active")))
            .push(ExactValue::new("owner", json!(7)))
            .push(Status::new(["draft"]));

        stack.remove::<ExactValue>();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.iter().next().unwrap().kind(), Status::KIND);

        let probe = Status::new(["anything"]);
        stack.remove_like(&probe);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_reset_clears() {
        let mut stack = CriteriaStack::new();
        stack.push(OfType::new("internal"));
        stack.reset();
        assert!(stack.is_empty());
        assert!(stack.build_query().is_unconstrained());
    }

    #[test]
    fn test_skip_preserves_contents() {
        let mut stack = CriteriaStack::new();
        stack.push(Status::new(["active"]));

        stack.set_skipped(true);
        assert!(stack.build_query().is_unconstrained());
        assert!(stack.effective().is_empty());
        assert_eq!(stack.len(), 1);

        stack.set_skipped(false);
        assert_eq!(stack.build_query().predicates().len(), 1);
        assert_eq!(stack.effective().len(), 1);
    }

    #[test]
    fn test_apply_folds_in_order() {
        let mut stack = CriteriaStack::new();
        stack
            .push(OrderBy::new("rank", crate::SortDirection::Desc))
            .push(OrderBy::new("name", crate::SortDirection::Asc));

        let query = stack.build_query();
        let columns: Vec<&str> = query.ordering().iter().map(|o| o.column.as_str()).collect();
        assert_eq!(columns, vec!["rank", "name"]);
    }

    #[derive(Debug)]
    struct Opaque;

    impl Criterion for Opaque {
        fn kind(&self) -> &'static str {
            "opaque"
        }

        fn apply(&self, _query: &mut Query) {}
    }

    #[test]
    fn test_default_fingerprint_is_unserializable() {
        let err = Opaque.fingerprint().unwrap_err();
        assert!(matches!(err, CriterionError::Unserializable { .. }));
        assert!(Opaque.as_hashable().is_none());
    }
}
