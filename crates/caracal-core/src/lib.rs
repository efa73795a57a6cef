//! Mandate storage, the pure authority evaluator, the event bus, and the
//! Merkle-anchored ledger.
//!
//! This crate is the largest in the workspace because it owns everything
//! downstream of "a mandate exists": storing it, deciding against it,
//! publishing what happened, and making what happened tamper-evident. The
//! identity and policy layer it reads from lives in `caracal-policy`; the
//! mandate data model and crypto primitives it operates on live in
//! `caracal-mandate`.

pub mod error;
pub mod evaluator;
pub mod event_bus;
pub mod ledger;
pub mod manager;
pub mod mandate_store;
pub mod merkle;
pub mod snapshot;

pub use error::CoreError;
pub use evaluator::{decide, DenialKind, Decision};
pub use event_bus::{ConsumedEvent, DlqEnvelope, EventBus, ReplayJob, ReplayStatus, Topic};
pub use ledger::{
    EventKind, EventVerification, Ledger, LedgerEvent, LedgerQuery, MerkleBatch, NewLedgerEvent,
};
pub use manager::MandateManager;
pub use mandate_store::MandateStore;
pub use snapshot::{build_snapshot, sign_snapshot, SignedSnapshot, Snapshot};
