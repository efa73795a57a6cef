//! `caracal verify` - verify a signed mandate against a trusted public key.

use anyhow::{Context, Result};
use caracal_mandate::{verify_mandate, Mandate, VerifyError};
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::DecodePublicKey;
use std::fs;

use crate::cli::args::VerifyArgs;
use crate::exit_codes;

pub fn run(args: VerifyArgs) -> i32 {
    match run_verify(&args) {
        Ok(result) => {
            if !args.quiet {
                println!("VALID");
                println!("  mandate_id: {}", result.mandate_id);
                println!("  key_id:     {}", result.key_id);
                println!("  signed_at:  {}", result.signed_at);
            }
            exit_codes::SUCCESS
        }
        Err(VerifyCliError::Verify(e)) => {
            if !args.quiet {
                eprintln!("INVALID: {e}");
            }
            e.exit_code()
        }
        Err(VerifyCliError::Other(e)) => {
            eprintln!("error: {e:#}");
            exit_codes::GENERAL_FAILURE
        }
    }
}

enum VerifyCliError {
    Verify(VerifyError),
    Other(anyhow::Error),
}

fn run_verify(args: &VerifyArgs) -> Result<caracal_mandate::VerifyResult, VerifyCliError> {
    let load = || -> Result<(Mandate, VerifyingKey)> {
        let mandate_json = fs::read_to_string(&args.mandate)
            .with_context(|| format!("failed to read mandate: {}", args.mandate.display()))?;
        let mandate: Mandate = serde_json::from_str(&mandate_json)
            .with_context(|| format!("failed to parse mandate: {}", args.mandate.display()))?;

        let pubkey_pem = fs::read_to_string(&args.pubkey)
            .with_context(|| format!("failed to read public key: {}", args.pubkey.display()))?;
        let trusted_key = VerifyingKey::from_public_key_pem(&pubkey_pem)
            .with_context(|| format!("failed to parse public key: {}", args.pubkey.display()))?;

        Ok((mandate, trusted_key))
    };

    let (mandate, trusted_key) = load().map_err(VerifyCliError::Other)?;
    verify_mandate(&mandate, &trusted_key).map_err(VerifyCliError::Verify)
}
