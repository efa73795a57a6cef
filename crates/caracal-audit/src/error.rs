//! Errors raised by the audit query/export surface. Query failures come
//! from the ledger underneath; export failures come from the sink the
//! caller handed us (a file, a socket, anything implementing `io::Write`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Ledger(#[from] caracal_core::CoreError),

    #[error("failed writing export output: {0}")]
    Write(#[from] std::io::Error),

    #[error("event {event_id} has no metering payload to translate")]
    NotMetering { event_id: i64 },
}
