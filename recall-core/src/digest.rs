//! Digest helpers for cache key derivation

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 content hash.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Lowercase hex SHA-256 of `content`.
pub fn hex_digest(content: &[u8]) -> String {
    hex::encode(compute_content_hash(content))
}

/// Stable byte encoding of a serializable value.
///
/// The value passes through `serde_json::Value` first, so map keys come out
/// sorted no matter which map type produced them.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&value)
}

/// Hex SHA-256 of the canonical encoding of `value`.
pub fn digest_canonical<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(hex_digest(&canonical_bytes(value)?))
}
