//! Query and export surface over the ledger.
//!
//! `caracal-core::Ledger` only knows how to append and fetch a single
//! event by id; this crate adds the filtered, multi-row read an operator
//! or compliance tool actually wants, plus three export encodings and a
//! back-compat translation for legacy cost-reporting consumers of
//! `metering` events.

pub mod error;
pub mod export;
pub mod metering;
pub mod query;

pub use caracal_core::{EventKind, LedgerEvent, LedgerQuery};
pub use error::AuditError;
pub use export::{export_csv, export_json, export_syslog};
pub use metering::{metering_record, metering_records, MeteringRecord};
pub use query::query;
