//! Id helpers shared across stores.
//!
//! Content-addressed ids throughout the service follow the same
//! `"sha256:" + lowercase_hex(digest)` convention used for mandate ids,
//! transaction refs, and ledger leaf hashes.

use sha2::{Digest, Sha256};

/// A fresh random principal id (UUIDv4, stringified).
pub fn new_principal_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// `"sha256:" + hex(SHA256(bytes))`.
pub fn sha256_id(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_id_has_expected_shape() {
        let id = sha256_id(b"hello");
        assert!(id.starts_with("sha256:"));
        assert_eq!(id.len(), 7 + 64);
    }

    #[test]
    fn sha256_id_is_deterministic() {
        assert_eq!(sha256_id(b"a"), sha256_id(b"a"));
        assert_ne!(sha256_id(b"a"), sha256_id(b"b"));
    }
}
