//! Deterministic cache keys for repository reads.
//!
//! A key is derived from the repository identity, the method name, the
//! positional arguments, the effective criteria stack and an optional
//! request-scope context:
//!
//! ```text
//! recall-repository;{identity}@{method};{sha256(args "-" criteria)};{context}
//! ```
//!
//! Each criterion contributes `sha256(kind ":" body)` where the body is its
//! own `cache_hash()` when it has one, else its structural fingerprint, else
//! its `Debug` rendering. Criterion digests are joined in stack order, so
//! reordering the stack yields a different key.

use std::fmt;
use std::sync::Arc;

use recall_core::{canonical_bytes, hex_digest, CriteriaStack, Criterion};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Leading key segment shared by every repository.
pub const KEY_NAMESPACE: &str = "recall-repository";

/// An opaque, non-reversible cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Supplies the request-scope identifier folded into every key.
pub trait ContextProvider: Send + Sync {
    fn context(&self) -> Option<String>;
}

/// No request scope; the context segment stays empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn context(&self) -> Option<String> {
        None
    }
}

/// A fixed context, e.g. the URL of the request a repository was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContext(pub String);

impl ContextProvider for StaticContext {
    fn context(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

impl<F> ContextProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn context(&self) -> Option<String> {
        self()
    }
}

/// Derives cache keys for one repository identity.
#[derive(Clone)]
pub struct CacheKeyGenerator {
    identity: String,
    context: Arc<dyn ContextProvider>,
}

impl fmt::Debug for CacheKeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheKeyGenerator")
            .field("identity", &self.identity)
            .field("context", &self.context.context())
            .finish()
    }
}

impl CacheKeyGenerator {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            context: Arc::new(NoContext),
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Key for `method(args)` under `criteria`.
    ///
    /// Only effective criteria count: a skipped stack keys the same as an
    /// empty one, which matches the query that actually runs.
    pub fn generate(&self, method: &str, args: &[Value], criteria: &CriteriaStack) -> CacheKey {
        let mut material = args_bytes(args);
        material.push(b'-');
        material.extend_from_slice(criteria_digest(criteria).as_bytes());

        CacheKey(format!(
            "{};{}@{};{};{}",
            KEY_NAMESPACE,
            self.identity,
            method,
            hex_digest(&material),
            self.context.context().unwrap_or_default()
        ))
    }
}

/// Digest of one criterion, always including its kind.
pub fn criterion_digest(criterion: &dyn Criterion) -> String {
    let body = match criterion.as_hashable() {
        Some(hashable) => hashable.cache_hash(),
        None => match criterion.fingerprint() {
            Ok(value) => value.to_string(),
            Err(_) => format!("{:?}", criterion),
        },
    };
    hex_digest(format!("{}:{}", criterion.kind(), body).as_bytes())
}

/// Order-sensitive digest over the effective criteria of a stack.
pub fn criteria_digest(criteria: &CriteriaStack) -> String {
    let joined = criteria
        .effective()
        .iter()
        .map(|criterion| criterion_digest(criterion.as_ref()))
        .collect::<Vec<_>>()
        .join(";");
    hex_digest(joined.as_bytes())
}

fn args_bytes(args: &[Value]) -> Vec<u8> {
    canonical_bytes(args).unwrap_or_else(|_| format!("{:?}", args).into_bytes())
}
