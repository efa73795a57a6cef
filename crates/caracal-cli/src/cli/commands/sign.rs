//! `caracal sign` - sign a mandate content file.

use anyhow::{Context, Result};
use caracal_mandate::{sign_mandate, MandateContent};
use p256::ecdsa::SigningKey;
use p256::pkcs8::DecodePrivateKey;
use std::fs;

use crate::cli::args::SignArgs;
use crate::exit_codes;

pub fn run(args: SignArgs) -> i32 {
    match run_sign(&args) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::GENERAL_FAILURE
        }
    }
}

fn run_sign(args: &SignArgs) -> Result<()> {
    let key_pem = fs::read_to_string(&args.key)
        .with_context(|| format!("failed to read private key: {}", args.key.display()))?;
    let signing_key = SigningKey::from_pkcs8_pem(&key_pem)
        .with_context(|| format!("failed to parse private key: {}", args.key.display()))?;

    let content_json = fs::read_to_string(&args.content)
        .with_context(|| format!("failed to read mandate content: {}", args.content.display()))?;
    let content: MandateContent = serde_json::from_str(&content_json)
        .with_context(|| format!("failed to parse mandate content: {}", args.content.display()))?;

    let mandate = sign_mandate(&content, &signing_key)?;

    let output_json = serde_json::to_string_pretty(&mandate)?;
    fs::write(&args.out, output_json)
        .with_context(|| format!("failed to write signed mandate: {}", args.out.display()))?;

    let sig = mandate.signature.as_ref().expect("just signed");
    println!("Signed mandate:");
    println!("  mandate_id: {}", mandate.mandate_id);
    println!("  subject_id: {}", mandate.content.subject_id);
    println!("  Output:     {}", args.out.display());
    println!();
    println!("Signature:");
    println!("  key_id:              {}", sig.key_id);
    println!("  signed_payload_digest: {}", sig.signed_payload_digest);
    println!("  signed_at:           {}", sig.signed_at);

    Ok(())
}
