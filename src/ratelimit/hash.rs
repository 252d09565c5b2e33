//! Hashing used for cookie signatures and counter keys.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::Result;

/// A shared hashing function.
///
/// Used both to sign cookie identities and to derive counter keys, so raw
/// identities never reach the counter store.
pub type HashFunction = Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// Hex-encoded SHA-256 digest of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// The default hashing function: SHA-256, hex encoded.
pub fn default_hash_function() -> HashFunction {
    Arc::new(|input: &str| Ok(sha256_hex(input)))
}

/// Compare two strings without short-circuiting on the first difference.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
