//! `caracal policy validate` - check a policy spec file before it's loaded.

use anyhow::{Context, Result};
use caracal_mandate::GlobPattern;
use serde::Deserialize;
use std::fs;

use crate::cli::args::PolicyValidateArgs;
use crate::exit_codes;

/// On-disk shape of a policy spec file (YAML or JSON), independent of the
/// principal it will be attached to and the audit fields `PolicyStore::create`
/// fills in itself.
#[derive(Debug, Deserialize)]
struct PolicySpecFile {
    allowed_resource_patterns: Vec<String>,
    allowed_actions: Vec<String>,
    max_validity_seconds: i64,
    #[serde(default)]
    allow_delegation: bool,
    #[serde(default)]
    max_delegation_depth: u32,
}

pub fn run(args: PolicyValidateArgs) -> i32 {
    match run_validate(&args) {
        Ok(()) => {
            println!("OK: {}", args.input.display());
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("invalid: {e:#}");
            exit_codes::VALIDATION_FAILED
        }
    }
}

fn run_validate(args: &PolicyValidateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;

    let spec: PolicySpecFile = if args
        .input
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == "yaml" || e == "yml")
    {
        serde_yaml::from_str(&raw).context("failed to parse as YAML")?
    } else {
        serde_json::from_str(&raw).context("failed to parse as JSON")?
    };

    if spec.allowed_resource_patterns.is_empty() {
        anyhow::bail!("allowed_resource_patterns must be non-empty");
    }
    if spec.allowed_actions.is_empty() {
        anyhow::bail!("allowed_actions must be non-empty");
    }
    if spec.max_validity_seconds <= 0 {
        anyhow::bail!("max_validity_seconds must be positive");
    }

    for pattern in spec.allowed_resource_patterns.iter().chain(&spec.allowed_actions) {
        GlobPattern::new(pattern)
            .with_context(|| format!("invalid glob pattern: {pattern}"))?;
    }

    Ok(())
}
