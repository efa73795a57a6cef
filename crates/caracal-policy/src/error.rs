//! Errors surfaced by the principal and policy stores.

use caracal_common::CaracalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("principal not found: {principal_id}")]
    PrincipalNotFound { principal_id: String },

    #[error("principal name already in use: {name}")]
    DuplicateName { name: String },

    #[error("delegation graph would become cyclic: {principal_id} is an ancestor of {parent_id}")]
    CyclicDelegation {
        principal_id: String,
        parent_id: String,
    },

    #[error("no active authority policy for principal: {principal_id}")]
    NoActivePolicy { principal_id: String },

    #[error("policy not found: {policy_id}")]
    PolicyNotFound { policy_id: String },

    #[error("invalid policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for PolicyError {
    fn from(e: rusqlite::Error) -> Self {
        PolicyError::Database(e.to_string())
    }
}

impl PolicyError {
    /// Maps onto the shared `caracal-common` exit code taxonomy.
    pub fn exit_code(&self) -> i32 {
        match self {
            PolicyError::PrincipalNotFound { .. }
            | PolicyError::PolicyNotFound { .. }
            | PolicyError::NoActivePolicy { .. } => 1,
            PolicyError::DuplicateName { .. }
            | PolicyError::CyclicDelegation { .. }
            | PolicyError::InvalidPolicy { .. } => 3,
            PolicyError::Database(_) => 4,
        }
    }
}

/// Boundary conversion into the cross-crate error taxonomy, used by the
/// gateway and CLI so they can handle a `PolicyError` the same way they
/// handle a mandate or evaluator error.
impl From<PolicyError> for CaracalError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::PrincipalNotFound { principal_id } => {
                CaracalError::not_found(format!("principal {principal_id}"))
            }
            PolicyError::PolicyNotFound { policy_id } => {
                CaracalError::not_found(format!("policy {policy_id}"))
            }
            PolicyError::NoActivePolicy { principal_id } => {
                CaracalError::not_found(format!("active policy for principal {principal_id}"))
            }
            PolicyError::DuplicateName { name } => {
                CaracalError::validation("name", format!("already in use: {name}"))
            }
            PolicyError::CyclicDelegation {
                principal_id,
                parent_id,
            } => CaracalError::validation(
                "parent_id",
                format!("{principal_id} is already an ancestor of {parent_id}"),
            ),
            PolicyError::InvalidPolicy { reason } => {
                CaracalError::validation("policy", reason)
            }
            PolicyError::Database(reason) => CaracalError::dependency_unavailable("sqlite", reason),
        }
    }
}
