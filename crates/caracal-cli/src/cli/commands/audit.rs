//! `caracal audit` - query and export ledger events.

use std::io;

use anyhow::{Context, Result};
use caracal_audit::{export_csv, export_json, export_syslog, metering_records, query};
use caracal_core::{EventKind, Ledger, LedgerQuery};

use crate::cli::args::{AuditCommand, AuditExportArgs, AuditFormat, AuditMeteringArgs};
use crate::exit_codes;

pub fn run(command: AuditCommand) -> i32 {
    let result = match command {
        AuditCommand::Export(args) => run_export(&args),
        AuditCommand::Metering(args) => run_metering(&args),
    };
    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::GENERAL_FAILURE
        }
    }
}

fn parse_kind(raw: &str) -> Result<EventKind> {
    match raw {
        "mandate_issued" => Ok(EventKind::MandateIssued),
        "mandate_delegated" => Ok(EventKind::MandateDelegated),
        "mandate_revoked" => Ok(EventKind::MandateRevoked),
        "authority_decision" => Ok(EventKind::AuthorityDecision),
        "metering" => Ok(EventKind::Metering),
        other => anyhow::bail!("unknown event kind: {other}"),
    }
}

fn build_filter(args: &AuditExportArgs) -> Result<LedgerQuery> {
    let mut filter = LedgerQuery::new().limit(args.limit);
    if let Some(principal) = &args.principal {
        filter = filter.principal(principal.clone());
    }
    if let Some(mandate) = &args.mandate {
        filter = filter.mandate(mandate.clone());
    }
    if let Some(kind) = &args.kind {
        filter = filter.kind(parse_kind(kind)?);
    }
    if let Some(correlation_id) = &args.correlation_id {
        filter = filter.correlation(correlation_id.clone());
    }
    Ok(filter)
}

fn run_export(args: &AuditExportArgs) -> Result<()> {
    let ledger = Ledger::open(&args.db).with_context(|| format!("failed to open ledger database: {}", args.db.display()))?;
    let filter = build_filter(args)?;
    let events = query(&ledger, &filter)?;

    let mut stdout = io::stdout().lock();
    match args.format {
        AuditFormat::Json => export_json(&events, &mut stdout)?,
        AuditFormat::Csv => export_csv(&events, &mut stdout)?,
        AuditFormat::Syslog => export_syslog(&events, &mut stdout)?,
    }
    Ok(())
}

fn run_metering(args: &AuditMeteringArgs) -> Result<()> {
    let ledger = Ledger::open(&args.db).with_context(|| format!("failed to open ledger database: {}", args.db.display()))?;
    let mut filter = LedgerQuery::new().limit(args.limit).kind(EventKind::Metering);
    if let Some(principal) = &args.principal {
        filter = filter.principal(principal.clone());
    }
    let events = query(&ledger, &filter)?;
    let records = metering_records(&events);
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
