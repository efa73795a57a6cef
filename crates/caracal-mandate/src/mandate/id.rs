//! Mandate content digest.
//!
//! The signature covers every field of a mandate except `revoked*`, so the
//! digest that gets signed is computed over `MandateContent` — which
//! already excludes `mandate_id` and `signature` by construction, avoiding
//! any circularity.
//!
//! ```text
//! content_digest = "sha256:" + lowercase_hex(SHA256(JCS(content)))
//! ```

use crate::crypto::jcs;
use crate::mandate::types::MandateContent;
use anyhow::{Context as _, Result};
use sha2::{Digest, Sha256};

/// Compute the canonical content digest of a mandate's hashable fields.
///
/// # Errors
///
/// Returns an error if `content` cannot be canonicalized to JCS.
pub fn compute_content_digest(content: &MandateContent) -> Result<String> {
    let canonical_bytes =
        jcs::to_vec(content).context("failed to canonicalize mandate content")?;
    let hash = Sha256::digest(&canonical_bytes);
    Ok(format!("sha256:{}", hex::encode(hash)))
}

/// Verify that `claimed_digest` matches the digest recomputed from
/// `content`.
///
/// # Errors
///
/// Returns an error if `content` cannot be canonicalized to JCS.
pub fn verify_content_digest(content: &MandateContent, claimed_digest: &str) -> Result<bool> {
    let computed = compute_content_digest(content)?;
    Ok(computed == claimed_digest)
}
