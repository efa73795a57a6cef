//! Execution mandate data model.
//!
//! This crate owns the signed-capability side of authority enforcement:
//! principals as they appear *inside* a mandate, scopes, validity windows,
//! the content-addressed `mandate_id`/`transaction_ref` scheme, ECDSA-P256
//! signing/verification, and the scope glob matcher. It does not own
//! storage or policy — those live in `caracal-policy` and `caracal-core`.

pub mod crypto;
pub mod mandate;

pub use mandate::{
    compute_content_digest, compute_key_id, compute_key_id_from_verifying_key, decode_wire_form,
    glob_matches, sign_mandate, to_wire_form, validate_delegation, verify_content_digest,
    verify_mandate, AuthMethod, Context, DelegationError, DelegationValidation, GlobError,
    GlobPattern, Intent, Mandate, MandateBuildError, MandateBuilder, MandateContent,
    MandateEventKind, MandateLifecycleEvent, Principal, Scope, Signature, SigningKey, Validity,
    VerifyError, VerifyResult, VerifyingKey, WireFormError, MANDATE_PAYLOAD_TYPE,
};
