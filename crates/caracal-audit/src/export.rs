//! Export formats for a queried event set: JSON array, CSV, and RFC 5424
//! syslog. All three write to whatever the caller hands in, so a CLI
//! command can point them at a file and a forwarder can point them at a
//! socket without this module knowing the difference.

use std::io::Write;

use caracal_core::LedgerEvent;
use chrono::Utc;

use crate::error::AuditError;

/// Write `events` as a single JSON array.
pub fn export_json(events: &[LedgerEvent], writer: &mut impl Write) -> Result<(), AuditError> {
    let body = serde_json::to_string_pretty(events).expect("LedgerEvent always serializes");
    writeln!(writer, "{body}")?;
    Ok(())
}

const CSV_HEADER: &str = "event_id,kind,timestamp,principal_id,mandate_id,decision,denial_reason,\
requested_action,requested_resource,correlation_id,payload_json";

/// Write `events` as CSV with a fixed header, newest-first as queried.
pub fn export_csv(events: &[LedgerEvent], writer: &mut impl Write) -> Result<(), AuditError> {
    writeln!(writer, "{CSV_HEADER}")?;
    for event in events {
        let payload_json = serde_json::to_string(&event.payload).unwrap_or_default();
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{},{},{},{}",
            event.event_id,
            csv_field(&event.kind),
            csv_field(&event.timestamp.to_rfc3339()),
            csv_field(event.principal_id.as_deref().unwrap_or_default()),
            csv_field(event.mandate_id.as_deref().unwrap_or_default()),
            event.decision.map(|d| d.to_string()).unwrap_or_default(),
            csv_field(event.denial_reason.as_deref().unwrap_or_default()),
            csv_field(event.requested_action.as_deref().unwrap_or_default()),
            csv_field(event.requested_resource.as_deref().unwrap_or_default()),
            csv_field(event.correlation_id.as_deref().unwrap_or_default()),
            csv_field(&payload_json),
        )?;
    }
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

const FACILITY_LOCAL0: u8 = 16;
const SEVERITY_INFORMATIONAL: u8 = 6;
const SEVERITY_WARNING: u8 = 4;

/// Write `events` as RFC 5424 syslog lines, one per event, with a denial
/// (`decision = false`) raised to warning severity and everything else at
/// informational.
pub fn export_syslog(events: &[LedgerEvent], sink: &mut impl Write) -> Result<(), AuditError> {
    for event in events {
        let severity =
            if event.decision == Some(false) { SEVERITY_WARNING } else { SEVERITY_INFORMATIONAL };
        let priority = u16::from(FACILITY_LOCAL0) * 8 + u16::from(severity);
        let payload_json = serde_json::to_string(&event.payload).unwrap_or_default();

        writeln!(
            sink,
            "<{priority}>1 {timestamp} caracal-core audit-logger - - \
             [caracal@32473 event_id=\"{event_id}\" kind=\"{kind}\" \
             principal_id=\"{principal_id}\" mandate_id=\"{mandate_id}\" \
             correlation_id=\"{correlation_id}\"] Caracal audit event: {payload_json}",
            priority = priority,
            timestamp = Utc::now().to_rfc3339(),
            event_id = event.event_id,
            kind = event.kind,
            principal_id = event.principal_id.as_deref().unwrap_or("-"),
            mandate_id = event.mandate_id.as_deref().unwrap_or("-"),
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            payload_json = payload_json,
        )?;
    }
    Ok(())
}
