//! Execution mandate module.
//!
//! Mandates are tamper-evident records that bind a scoped, time-bounded
//! capability to a subject principal. They provide:
//!
//! - **Proof of authorization** — an ECDSA-P256 signature over the
//!   mandate's canonical content.
//! - **Scope limitation** — resource and action glob patterns.
//! - **Time bounds** — a `valid_from`/`valid_until` window.
//! - **Delegation** — a mandate can chain to a parent, narrowing scope and
//!   validity at each hop.
//!
//! # Example
//!
//! ```rust
//! use caracal_mandate::mandate::{MandateBuilder, Scope, Validity, Context};
//! use chrono::{Duration, Utc};
//!
//! let content = MandateBuilder::default()
//!     .issuer("root")
//!     .subject("agent-1")
//!     .scope(Scope::new(vec!["api:openai:*".to_string()], vec!["api_call".to_string()]))
//!     .validity(Validity::new(Utc::now(), Utc::now() + Duration::minutes(30)))
//!     .context(Context::new("myorg/app", "auth.myorg.com"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(content.issuer_id, "root");
//! ```

pub mod events;
pub mod glob;
pub mod id;
pub mod policy;
pub mod signing;
pub mod types;

pub use events::{MandateEventKind, MandateLifecycleEvent};
pub use glob::{glob_matches, matches_any, GlobError, GlobPattern, GlobSet};
pub use id::{compute_content_digest, verify_content_digest};
pub use policy::{validate_delegation, DelegationError, DelegationValidation};
pub use signing::{
    compute_key_id, compute_key_id_from_verifying_key, decode_wire_form, sign_mandate,
    to_wire_form, verify_mandate, VerifyError, VerifyResult, WireFormError,
};
pub use types::{
    AuthMethod, Context, Intent, Mandate, MandateBuildError, MandateBuilder, MandateContent,
    Principal, Scope, Signature, Validity, MANDATE_PAYLOAD_TYPE,
};

pub use p256::ecdsa::{SigningKey, VerifyingKey};
