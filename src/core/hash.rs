//! SHA-256 content hashing for pack identity, file integrity and evidence.

use crate::core::error::SpecPackError;
use sha2::{Digest, Sha256};

/// Number of hex characters shown when a hash is displayed to an operator.
pub const DISPLAY_PREFIX_LEN: usize = 12;

/// Digest of the empty byte string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn hash_text(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Display-only prefix. Never store or compare this value.
pub fn short_hash(hex: &str) -> &str {
    let end = hex.len().min(DISPLAY_PREFIX_LEN);
    &hex[..end]
}

pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub fn verify_sha256(label: &str, bytes: &[u8], expected: &str) -> Result<String, SpecPackError> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(SpecPackError::HashMismatch {
            label: label.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(actual)
}
