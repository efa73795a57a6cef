//! Mandate signing, verification, and the JWS-like wire form.
//!
//! ```text
//! 1. Assign mandate_id (random UUID)
//! 2. Build signable_content = content + mandate_id (no signature, no revocation fields)
//! 3. canonical = JCS(signable_content)
//! 4. pae = DSSEv1_PAE(payload_type, canonical)
//! 5. signature_bytes = ECDSA-P256_sign(issuer_private_key, SHA256(pae))
//! 6. Signature{ algorithm: "ES256", signed_payload_digest: sha256(canonical), key_id, signature, signed_at }
//! ```
//!
//! A mandate also has a wire form for transport: a JWS-like triple
//! `base64url(header).base64url(payload).base64url(signature)` where the
//! header is `{"alg":"ES256","kid":<key_id>,"typ":"mandate"}` and the
//! payload is the canonical JSON of every mandate field except `signature`
//! and the revocation fields.

use crate::crypto::jcs;
use crate::mandate::types::{Mandate, MandateContent, Signature, MANDATE_PAYLOAD_TYPE};
use anyhow::{Context as AnyhowContext, Result};
use base64::engine::{general_purpose::STANDARD as BASE64, general_purpose::URL_SAFE_NO_PAD as BASE64URL};
use base64::Engine;
use chrono::Utc;
use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Verification errors with exit codes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VerifyError {
    #[error("mandate is not signed")]
    Unsigned,

    #[error("malformed signature: {reason}")]
    Malformed { reason: String },

    #[error("algorithm mismatch: expected ES256, got {algorithm}")]
    AlgorithmMismatch { algorithm: String },

    #[error("payload type mismatch: expected {expected}, got {got}")]
    PayloadTypeMismatch { expected: String, got: String },

    #[error("signed_payload_digest mismatch: computed {computed}, claimed {claimed}")]
    SignedPayloadDigestMismatch { computed: String, claimed: String },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("key not trusted: {key_id}")]
    KeyNotTrusted { key_id: String },

    #[error("key_id mismatch: claimed {claimed}, actual {actual}")]
    KeyIdMismatch { claimed: String, actual: String },
}

impl VerifyError {
    /// Exit code for the CLI's `tool verify` subcommand.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unsigned => 2,
            Self::KeyNotTrusted { .. } => 3,
            Self::SignatureInvalid
            | Self::PayloadTypeMismatch { .. }
            | Self::KeyIdMismatch { .. }
            | Self::SignedPayloadDigestMismatch { .. } => 4,
            Self::Malformed { .. } | Self::AlgorithmMismatch { .. } => 1,
        }
    }
}

/// Result of successful verification.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub mandate_id: String,
    pub key_id: String,
    pub signed_at: chrono::DateTime<Utc>,
}

/// Compute `key_id` from SPKI-encoded public key bytes: `sha256:<hex>`.
pub fn compute_key_id(spki_bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(spki_bytes))
}

/// Compute `key_id` from a `VerifyingKey`.
pub fn compute_key_id_from_verifying_key(key: &VerifyingKey) -> Result<String> {
    let spki_bytes = key_to_spki_der(key)?;
    Ok(compute_key_id(&spki_bytes))
}

fn key_to_spki_der(key: &VerifyingKey) -> Result<Vec<u8>> {
    use p256::pkcs8::EncodePublicKey;
    let doc = key
        .to_public_key_der()
        .map_err(|e| anyhow::anyhow!("failed to encode public key as SPKI DER: {e}"))?;
    Ok(doc.as_bytes().to_vec())
}

/// DSSE Pre-Authentication Encoding: `"DSSEv1" SP len(type) SP type SP len(payload) SP payload`.
fn build_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut pae = Vec::new();
    pae.extend_from_slice(b"DSSEv1 ");
    pae.extend_from_slice(payload_type.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload_type.as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload.len().to_string().as_bytes());
    pae.push(b' ');
    pae.extend_from_slice(payload);
    pae
}

/// The fields that get canonicalized and signed: every mandate field
/// except the revocation fields and the signature itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignableMandate {
    mandate_id: String,
    #[serde(flatten)]
    content: MandateContent,
}

/// Sign mandate content, minting a fresh `mandate_id` and producing a
/// complete, signed `Mandate`.
pub fn sign_mandate(content: &MandateContent, signing_key: &SigningKey) -> Result<Mandate> {
    let mandate_id = uuid::Uuid::new_v4().to_string();
    let signable = SignableMandate {
        mandate_id: mandate_id.clone(),
        content: content.clone(),
    };

    let canonical =
        jcs::to_vec(&signable).context("failed to canonicalize mandate for signing")?;
    let signed_payload_digest = format!("sha256:{:x}", Sha256::digest(&canonical));

    let pae = build_pae(MANDATE_PAYLOAD_TYPE, &canonical);
    let signature: EcdsaSignature = signing_key.sign(&pae);

    let verifying_key = VerifyingKey::from(signing_key);
    let key_id = compute_key_id_from_verifying_key(&verifying_key)?;

    let sig = Signature {
        algorithm: "ES256".to_string(),
        payload_type: MANDATE_PAYLOAD_TYPE.to_string(),
        signed_payload_digest,
        key_id,
        signature: BASE64.encode(signature.to_der().as_bytes()),
        signed_at: Utc::now(),
    };

    Ok(Mandate {
        mandate_id,
        content: content.clone(),
        signature: Some(sig),
        revoked: false,
        revoked_at: None,
        revoked_by: None,
        revocation_reason: None,
    })
}

/// Verify a signed mandate against a trusted public key.
///
/// Per the integrity invariant, this checks `verify(issuer_key,
/// canonical(mandate_without_revocation), mandate.signature)` — tampering
/// with any field other than the revocation metadata invalidates the
/// signature.
pub fn verify_mandate(
    mandate: &Mandate,
    trusted_key: &VerifyingKey,
) -> Result<VerifyResult, VerifyError> {
    let sig = mandate.signature.as_ref().ok_or(VerifyError::Unsigned)?;

    if sig.algorithm != "ES256" {
        return Err(VerifyError::AlgorithmMismatch {
            algorithm: sig.algorithm.clone(),
        });
    }
    if sig.payload_type != MANDATE_PAYLOAD_TYPE {
        return Err(VerifyError::PayloadTypeMismatch {
            expected: MANDATE_PAYLOAD_TYPE.to_string(),
            got: sig.payload_type.clone(),
        });
    }

    let signable = SignableMandate {
        mandate_id: mandate.mandate_id.clone(),
        content: mandate.content.clone(),
    };
    let canonical = jcs::to_vec(&signable).map_err(|e| VerifyError::Malformed {
        reason: e.to_string(),
    })?;

    let computed_digest = format!("sha256:{:x}", Sha256::digest(&canonical));
    if computed_digest != sig.signed_payload_digest {
        return Err(VerifyError::SignedPayloadDigestMismatch {
            computed: computed_digest,
            claimed: sig.signed_payload_digest.clone(),
        });
    }

    let pae = build_pae(&sig.payload_type, &canonical);
    let signature_bytes = BASE64.decode(&sig.signature).map_err(|e| VerifyError::Malformed {
        reason: format!("invalid base64 signature: {e}"),
    })?;
    let signature =
        EcdsaSignature::from_der(&signature_bytes).map_err(|e| VerifyError::Malformed {
            reason: format!("invalid signature bytes: {e}"),
        })?;

    trusted_key
        .verify(&pae, &signature)
        .map_err(|_| VerifyError::SignatureInvalid)?;

    let actual_key_id =
        compute_key_id_from_verifying_key(trusted_key).map_err(|e| VerifyError::Malformed {
            reason: e.to_string(),
        })?;
    if sig.key_id != actual_key_id {
        return Err(VerifyError::KeyIdMismatch {
            claimed: sig.key_id.clone(),
            actual: actual_key_id,
        });
    }

    Ok(VerifyResult {
        mandate_id: mandate.mandate_id.clone(),
        key_id: sig.key_id.clone(),
        signed_at: sig.signed_at,
    })
}

/// JWS-like header for the wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JwsHeader<'a> {
    alg: &'a str,
    kid: &'a str,
    typ: &'a str,
}

/// Errors decoding a mandate wire form (`base64url(header).base64url(payload).base64url(sig)`).
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireFormError {
    #[error("wire form must have exactly three '.'-separated segments")]
    MalformedEnvelope,
    #[error("base64url decode failed: {0}")]
    Base64(String),
    #[error("JSON decode failed: {0}")]
    Json(String),
}

/// Encode a signed mandate as its JWS-like wire form.
///
/// # Panics
///
/// Panics if `mandate` is unsigned — callers must sign before serializing
/// for transport.
pub fn to_wire_form(mandate: &Mandate) -> String {
    let sig = mandate
        .signature
        .as_ref()
        .expect("to_wire_form requires a signed mandate");

    let header = JwsHeader {
        alg: "ES256",
        kid: &sig.key_id,
        typ: "mandate",
    };
    let header_json = serde_json::to_vec(&header).expect("header always serializes");
    let payload = SignableMandate {
        mandate_id: mandate.mandate_id.clone(),
        content: mandate.content.clone(),
    };
    let payload_json = jcs::to_vec(&payload).expect("mandate content always canonicalizes");

    format!(
        "{}.{}.{}",
        BASE64URL.encode(header_json),
        BASE64URL.encode(payload_json),
        sig.signature.replace('+', "-").replace('/', "_").trim_end_matches('=')
    )
}

/// Decode a wire form back into `(mandate_id, content)`, without verifying
/// the signature — callers must separately verify against a trusted key
/// before acting on the result.
pub fn decode_wire_form(wire: &str) -> Result<(String, MandateContent), WireFormError> {
    let mut parts = wire.split('.');
    let (header_b64, payload_b64, _sig_b64) = match (parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s)) if parts.next().is_none() => (h, p, s),
        _ => return Err(WireFormError::MalformedEnvelope),
    };
    let _ = header_b64;

    let payload_bytes = BASE64URL
        .decode(payload_b64)
        .map_err(|e| WireFormError::Base64(e.to_string()))?;
    let signable: SignableMandate =
        serde_json::from_slice(&payload_bytes).map_err(|e| WireFormError::Json(e.to_string()))?;

    Ok((signable.mandate_id, signable.content))
}
