//! LMDB-backed persistent cache.
//!
//! Uses the heed crate (Rust bindings for LMDB) for a memory-mapped
//! key-value store that outlives the process, so both cache entries and the
//! key registry survive restarts.
//!
//! # Value Layout
//!
//! `[expires_at: i64 little-endian unix millis][payload bytes]`
//!
//! Entries stored with [`CacheBackend::forever`] carry `i64::MAX`. Expired
//! entries are deleted by the read that finds them, or in bulk by
//! [`LmdbCacheBackend::purge_expired`].
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions; `put`,
//! `forget`, set updates and purges use write transactions, so a set
//! append is never interleaved with another writer. Statistics are atomic
//! counters.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use recall_core::{CacheError, RecallError, RecallResult};

use super::traits::{decode_set, set_with_member, CacheBackend, CacheStats};

const HEADER_LEN: usize = 8;
const NEVER_EXPIRES: i64 = i64::MAX;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry for key {0}")]
    CorruptEntry(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for RecallError {
    fn from(e: LmdbCacheError) -> Self {
        RecallError::Cache(CacheError::Lmdb {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn encode(expires_at: i64, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&expires_at.to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn expires_at(bytes: &[u8]) -> Option<i64> {
    let header: [u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;
    Some(i64::from_le_bytes(header))
}

fn expiry_for(ttl: Duration) -> i64 {
    let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(NEVER_EXPIRES);
    Utc::now().timestamp_millis().saturating_add(ttl_millis)
}

/// Persistent cache in a single LMDB database.
///
/// # Example
///
/// ```ignore
/// let backend = Arc::new(LmdbCacheBackend::new("/var/cache/recall", 256)?);
/// let repository = CachingRepository::new(inner, CacheSettings::default())?
///     .with_backend(backend);
/// ```
pub struct LmdbCacheBackend {
    env: Env,
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LmdbCacheBackend {
    /// Open (or create) a cache rooted at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this
        // backend and never mapped twice from the same process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete(&self, key: &str) -> Result<bool, LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        if deleted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(deleted)
    }

    /// Payload of a stored value, or `None` when it is expired or has no
    /// header.
    fn live_payload(value: &[u8], now: i64) -> Option<&[u8]> {
        let expiry = expires_at(value)?;
        (expiry > now).then(|| &value[HEADER_LEN..])
    }

    fn append_member(&self, key: &str, member: &str) -> Result<bool, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let updated = {
            let stored = self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)?;
            set_with_member(key, stored.and_then(|v| Self::live_payload(v, now)), member)
        };
        let Some(bytes) = updated else {
            wtxn.abort();
            return Ok(false);
        };

        self.db
            .put(&mut wtxn, key.as_bytes(), &encode(NEVER_EXPIRES, &bytes))
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    fn remove_set(&self, key: &str) -> Result<Vec<String>, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let members = {
            let stored = self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)?;
            stored
                .and_then(|v| Self::live_payload(v, now))
                .map(|payload| decode_set(key, payload))
                .unwrap_or_default()
        };
        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        if deleted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(members)
    }

    /// Delete every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<u64, LmdbCacheError> {
        let now = Utc::now().timestamp_millis();

        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let iter = self.db.iter(&rtxn).map_err(txn_err)?;
            iter.filter_map(Result::ok)
                .filter(|(_, value)| expires_at(value).is_some_and(|at| at <= now))
                .map(|(key, _)| key.to_vec())
                .collect()
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut removed = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                removed += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        self.evictions.fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> RecallResult<Option<Vec<u8>>> {
        let stored = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            self.db
                .get(&rtxn, key.as_bytes())
                .map_err(txn_err)?
                .map(<[u8]>::to_vec)
        };

        let Some(bytes) = stored else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let expiry =
            expires_at(&bytes).ok_or_else(|| LmdbCacheError::CorruptEntry(key.to_string()))?;
        if expiry <= Utc::now().timestamp_millis() {
            self.delete(key)?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(bytes[HEADER_LEN..].to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> RecallResult<()> {
        self.write(key, &encode(expiry_for(ttl), &value))?;
        Ok(())
    }

    async fn forever(&self, key: &str, value: Vec<u8>) -> RecallResult<()> {
        self.write(key, &encode(NEVER_EXPIRES, &value))?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> RecallResult<bool> {
        Ok(self.delete(key)?)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> RecallResult<bool> {
        Ok(self.append_member(key, member)?)
    }

    async fn take_set(&self, key: &str) -> RecallResult<Vec<String>> {
        Ok(self.remove_set(key)?)
    }

    async fn stats(&self) -> RecallResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_err)?;
        let memory_bytes = self
            .db
            .iter(&rtxn)
            .map_err(txn_err)?
            .filter_map(Result::ok)
            .map(|(_, value)| value.len().saturating_sub(HEADER_LEN) as u64)
            .sum();

        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
