//! recall core - criteria, query values, settings and errors
//!
//! Pure data and pure functions. Nothing in this crate performs I/O; the
//! cache engine and its backends live in `recall-storage`.

pub mod config;
pub mod criteria;
pub mod digest;
pub mod error;
pub mod filter;
pub mod query;

pub use config::{CacheSettings, DEFAULT_CACHE_DURATION_MINUTES};
pub use criteria::{
    CriteriaStack, Criterion, CriterionKind, ExactValue, FieldValueSet, HashableCriterion,
    InCategory, OfType, OrderBy, Search, Status,
};
pub use digest::{canonical_bytes, compute_content_hash, digest_canonical, hex_digest, ContentHash};
pub use error::{
    CacheError, ConfigError, CriterionError, RecallError, RecallResult, StorageError,
};
pub use filter::{FilterExpr, FilterOperator, Predicate};
pub use query::{Columns, OrderClause, Query, SortDirection};

/// Field/value map used for create and update payloads.
pub type Attributes = serde_json::Map<String, serde_json::Value>;
