//! Read-through cache for criteria-driven repositories.
//!
//! Reads are keyed by [`CacheKeyGenerator`] from the repository identity, the
//! method, its arguments, the effective criteria stack and an optional
//! request context. [`CacheDecorator`] serves a key from the backend or
//! computes and stores it. Writes run first, then clear everything the
//! repository cached: with one tag flush when the backend implements
//! [`TaggableCache`], otherwise by evicting each key recorded in the
//! [`KeyRegistry`].
//!
//! # Example
//!
//! ```ignore
//! let backend: Arc<dyn CacheBackend> = Arc::new(InMemoryCacheBackend::with_tags());
//! let mut projects = CachingRepository::new(base, CacheSettings::from_env())?
//!     .with_backend(backend);
//!
//! projects.push_criteria(Status::new(["active"]));
//! let page = projects.paginate(Some(15), Some(2), &Columns::All).await?;
//!
//! // Clears every cached read of `projects`.
//! projects.create(attributes).await?;
//! ```

pub mod caching_repository;
pub mod decorator;
pub mod invalidation;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod registry;
pub mod traits;

pub use caching_repository::CachingRepository;
pub use decorator::CacheDecorator;
pub use invalidation::{InvalidationReport, InvalidationStrategy};
pub use key::{
    criteria_digest, criterion_digest, CacheKey, CacheKeyGenerator, ContextProvider, NoContext,
    StaticContext, KEY_NAMESPACE,
};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use registry::KeyRegistry;
pub use traits::{CacheBackend, CacheStats, CacheableEntity, TaggableCache};
