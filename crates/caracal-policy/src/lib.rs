//! Principal identity and authority policy storage.
//!
//! This crate owns the two identity-adjacent tables every other crate reads
//! from: the principal graph (`PrincipalStore`) and the versioned authority
//! policy that bounds what a principal may have minted on its behalf
//! (`PolicyStore`). It does not evaluate requests — that's `caracal-core`'s
//! evaluator, which treats an `AuthorityPolicy` as an input.

pub mod error;
pub mod events;
pub mod policy;
pub mod principal;
pub mod schema;

pub use error::PolicyError;
pub use events::{PolicyChangeEvent, PrincipalLifecycle, PrincipalLifecycleEvent};
pub use policy::{
    AuthorityPolicy, PolicyChangeKind, PolicyDiff, PolicySpec, PolicyStore, PolicyVersion,
};
pub use principal::{
    validate_acyclic, NewPrincipal, Principal, PrincipalStore, PrincipalType,
};
