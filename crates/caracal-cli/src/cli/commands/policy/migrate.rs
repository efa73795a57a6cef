//! `caracal policy migrate` - one-shot ETL from the legacy JSON-lines policy
//! format into a `PolicyStore` database. One record per line; each record
//! becomes one `PolicyStore::create` call for its principal.

use anyhow::{Context, Result};
use caracal_policy::{PolicySpec, PolicyStore};
use chrono::Utc;
use serde::Deserialize;
use std::fs;

use crate::cli::args::PolicyMigrateArgs;
use crate::exit_codes;

#[derive(Debug, Deserialize)]
struct LegacyRecord {
    principal_id: String,
    allowed_resource_patterns: Vec<String>,
    allowed_actions: Vec<String>,
    max_validity_seconds: i64,
    #[serde(default)]
    allow_delegation: bool,
    #[serde(default)]
    max_delegation_depth: u32,
}

pub fn run(args: PolicyMigrateArgs) -> i32 {
    match run_migrate(&args) {
        Ok(count) => {
            println!(
                "{} {} polic{}",
                if args.dry_run { "Would migrate" } else { "Migrated" },
                count,
                if count == 1 { "y" } else { "ies" },
            );
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::GENERAL_FAILURE
        }
    }
}

fn run_migrate(args: &PolicyMigrateArgs) -> Result<usize> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let records: Vec<LegacyRecord> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("failed to parse line {}", i + 1))
        })
        .collect::<Result<_>>()?;

    if records.is_empty() {
        anyhow::bail!("no records found in {}", args.input.display());
    }

    let store = if args.dry_run {
        PolicyStore::memory()
    } else {
        PolicyStore::open(&args.db)
    }
    .with_context(|| format!("failed to open policy store: {}", args.db.display()))?;

    let now = Utc::now();
    for record in &records {
        let spec = PolicySpec {
            allowed_resource_patterns: record.allowed_resource_patterns.clone(),
            allowed_actions: record.allowed_actions.clone(),
            max_validity_seconds: record.max_validity_seconds,
            allow_delegation: record.allow_delegation,
            max_delegation_depth: record.max_delegation_depth,
        };
        let policy = store
            .create(
                &record.principal_id,
                spec,
                &args.created_by,
                "migrated from legacy JSON-lines format",
                now,
            )
            .with_context(|| format!("failed to migrate policy for {}", record.principal_id))?;

        // Spot-check: re-read what was just written and compare counts.
        if !args.dry_run {
            let reloaded = store
                .get_active(&record.principal_id)
                .with_context(|| format!("spot-check read failed for {}", record.principal_id))?;
            if reloaded.policy_id != policy.policy_id {
                anyhow::bail!(
                    "spot-check mismatch for {}: wrote policy_id {}, active policy_id is {}",
                    record.principal_id,
                    policy.policy_id,
                    reloaded.policy_id
                );
            }
        }
    }

    Ok(records.len())
}
