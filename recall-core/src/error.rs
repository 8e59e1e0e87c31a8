//! Error types for recall operations

use thiserror::Error;

/// Errors raised by the underlying query engine.
///
/// The caching layer passes these through untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Query failed for {entity}: {reason}")]
    QueryFailed { entity: String, reason: String },

    #[error("Insert failed for {entity}: {reason}")]
    InsertFailed { entity: String, reason: String },

    #[error("Update failed for {entity} with id {id}: {reason}")]
    UpdateFailed {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Delete failed for {entity} with id {id}: {reason}")]
    DeleteFailed {
        entity: String,
        id: String,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Cache backend and invalidation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    #[error("Failed to serialize cached value: {reason}")]
    Serialization { reason: String },

    #[error("Failed to deserialize cached value for key {key}: {reason}")]
    Deserialization { key: String, reason: String },

    #[error("Invalidation partially failed: {failed} of {attempted} evictions failed")]
    InvalidationPartialFailure { failed: usize, attempted: usize },

    #[error("LMDB error: {reason}")]
    Lmdb { reason: String },
}

/// Criterion errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CriterionError {
    #[error("Criterion {kind} cannot be canonicalized: {reason}")]
    Unserializable { kind: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all recall errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecallError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Criterion error: {0}")]
    Criterion(#[from] CriterionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl RecallError {
    /// True when the error reports a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RecallError::Storage(StorageError::NotFound { .. }))
    }
}

/// Result type alias for recall operations.
pub type RecallResult<T> = Result<T, RecallError>;

// =============================================================================
// TESTS
// =============================================================================
