//! Error taxonomy shared by every Caracal crate.
//!
//! §7 of the design names six kinds, not six concrete types: every crate's
//! own `thiserror` enum (mandate integrity, policy violations, store I/O)
//! converts into one of these at the boundary it crosses, the way the
//! codebase this is adapted from gives each domain enum an `exit_code()`
//! and lets callers map on that instead of matching concrete variants.

use thiserror::Error;

/// Coarse classification used to map any error to an HTTP status, an exit
/// code, or a retry policy without the caller needing to know which crate
/// raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input: bad UUID, unknown enum, missing required field.
    Validation,
    /// Signature invalid, delegation chain cycle, scope escalation.
    MandateIntegrity,
    /// Mandate/policy/principal absent. Not raised by the evaluator itself
    /// (there, absence is the `POLICY_NOT_FOUND` deny reason, not an error).
    NotFound,
    /// Database or event bus unreachable.
    DependencyUnavailable,
    /// Timeout or lock conflict; caller should retry with backoff.
    Transient,
    /// Detected corruption (ledger hash mismatch, Merkle root mismatch).
    /// The component must stop accepting writes.
    Fatal,
}

/// The shared error type. Crate-local error enums implement `From` into
/// this rather than the other way around, so each crate keeps its own
/// precise variants for tests while call sites that only need to branch on
/// `kind()` can do so uniformly.
#[derive(Debug, Error)]
pub enum CaracalError {
    #[error("validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("mandate integrity violation: {detail}")]
    MandateIntegrity { detail: String },

    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("dependency unavailable: {dependency}: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("transient failure: {reason}")]
    Transient { reason: String },

    #[error("fatal: {reason}")]
    Fatal { reason: String },
}

impl CaracalError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn mandate_integrity(detail: impl Into<String>) -> Self {
        Self::MandateIntegrity {
            detail: detail.into(),
        }
    }

    pub fn dependency_unavailable(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::MandateIntegrity { .. } => ErrorKind::MandateIntegrity,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// Exit code for the admin CLI, per the external-interfaces table:
    /// 0 success, 1 general failure, 2 bad arguments, 3 validation failed,
    /// 4 dependency unavailable, 5 policy denied the operation.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Validation => 3,
            ErrorKind::MandateIntegrity => 5,
            ErrorKind::NotFound => 1,
            ErrorKind::DependencyUnavailable => 4,
            ErrorKind::Transient => 4,
            ErrorKind::Fatal => 1,
        }
    }
}

impl From<rusqlite::Error> for CaracalError {
    fn from(e: rusqlite::Error) -> Self {
        Self::dependency_unavailable("sqlite", e.to_string())
    }
}
