//! Back-compat translation of a `metering` ledger event into the
//! `{agent_id, resource_type, cost}` shape older cost-reporting tooling
//! expects. This is a translation, not a cost estimator: the cost figure
//! already lives in the event's payload (the gateway stamped it from the
//! `x-caracal-estimated-cost` header before publishing), so there is no
//! pricebook or heuristic here.

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use caracal_core::LedgerEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteringRecord {
    pub agent_id: String,
    pub resource_type: String,
    pub cost: f64,
}

/// Translate one `metering`-kind ledger event. Fails if `event` isn't a
/// metering event or its payload lacks a numeric `cost` field.
pub fn metering_record(event: &LedgerEvent) -> Result<MeteringRecord, AuditError> {
    if event.kind != "metering" {
        return Err(AuditError::NotMetering { event_id: event.event_id });
    }
    let cost = event
        .payload
        .get("cost")
        .and_then(serde_json::Value::as_f64)
        .ok_or(AuditError::NotMetering { event_id: event.event_id })?;
    let agent_id = event.principal_id.clone().unwrap_or_else(|| "unknown".to_string());
    let resource_type = event
        .payload
        .get("resource_type")
        .and_then(serde_json::Value::as_str)
        .or(event.requested_resource.as_deref())
        .unwrap_or("unknown")
        .to_string();

    Ok(MeteringRecord { agent_id, resource_type, cost })
}

/// Translate every metering event in `events`, dropping anything that
/// isn't a well-formed metering record instead of failing the whole batch.
pub fn metering_records(events: &[LedgerEvent]) -> Vec<MeteringRecord> {
    events.iter().filter_map(|e| metering_record(e).ok()).collect()
}
