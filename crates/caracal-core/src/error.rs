//! Errors raised by the mandate store, manager, event bus, ledger, and
//! Merkle batcher. Each variant maps onto one of `caracal_common`'s six
//! taxonomy kinds at the boundary these components cross, the same pattern
//! `caracal_policy::PolicyError` uses for the identity/policy layer.

use caracal_common::CaracalError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("mandate not found: {mandate_id}")]
    MandateNotFound { mandate_id: String },

    #[error("mandate integrity violation: {detail}")]
    MandateValidation { detail: String },

    #[error("policy violation: {reason}")]
    PolicyViolation { reason: String },

    #[error("batch not found: {batch_id}")]
    BatchNotFound { batch_id: String },

    #[error("event {event_id} not found in the ledger")]
    EventNotFound { event_id: i64 },

    #[error("ledger corruption detected: {detail}")]
    LedgerCorruption { detail: String },

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl CoreError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::MandateNotFound { .. }
            | CoreError::BatchNotFound { .. }
            | CoreError::EventNotFound { .. } => 1,
            CoreError::MandateValidation { .. } | CoreError::PolicyViolation { .. } => 5,
            CoreError::Database(_) => 4,
            CoreError::LedgerCorruption { .. } => 1,
        }
    }
}

impl From<CoreError> for CaracalError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MandateNotFound { mandate_id } => {
                CaracalError::not_found(format!("mandate {mandate_id}"))
            }
            CoreError::BatchNotFound { batch_id } => {
                CaracalError::not_found(format!("merkle batch {batch_id}"))
            }
            CoreError::EventNotFound { event_id } => {
                CaracalError::not_found(format!("ledger event {event_id}"))
            }
            CoreError::MandateValidation { detail } => CaracalError::mandate_integrity(detail),
            CoreError::PolicyViolation { reason } => CaracalError::validation("policy", reason),
            CoreError::Database(reason) => CaracalError::dependency_unavailable("sqlite", reason),
            CoreError::LedgerCorruption { detail } => CaracalError::Fatal { reason: detail },
        }
    }
}
