//! Content hashing helpers.

use sha2::{Digest, Sha256};

use crate::types::{ChainMailError, Result, HASH_SIZE};

/// SHA-256 digest of `data`.
pub fn content_hash(data: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(data).into()
}

/// Cache key for a retrieval URL. The URL text itself is never used as a key.
pub fn url_cache_key(url: &str) -> String {
    hex::encode(content_hash(url.as_bytes()))
}

/// Verify that `data` hashes to `expected`.
pub fn verify_hash(data: &[u8], expected: &[u8]) -> Result<()> {
    if expected.len() != HASH_SIZE {
        return Err(ChainMailError::Integrity(format!(
            "expected hash must be {} bytes, got {}",
            HASH_SIZE,
            expected.len()
        )));
    }
    let actual = content_hash(data);
    if actual.as_slice() != expected {
        return Err(ChainMailError::Integrity(format!(
            "hash mismatch: expected {}, got {}",
            hex::encode(expected),
            hex::encode(actual)
        )));
    }
    Ok(())
}
