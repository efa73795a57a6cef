//! Filtered reads over the ledger, the same `AND`-accumulated predicate
//! shape the legacy audit-log query used: principal, mandate, kind,
//! correlation id, and a time window, newest event first.

use caracal_core::{Ledger, LedgerEvent, LedgerQuery};

use crate::error::AuditError;

/// Run `filter` against `ledger` and return the matching events, most
/// recent first. A bare `LedgerQuery::new()` returns the most recent
/// `filter.limit` events across every principal.
pub fn query(ledger: &Ledger, filter: &LedgerQuery) -> Result<Vec<LedgerEvent>, AuditError> {
    ledger.query(filter).map_err(AuditError::from)
}
