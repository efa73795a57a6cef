//! `caracal keygen` - generate an ECDSA-P256 signing keypair.

use anyhow::{Context, Result};
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand_core::OsRng;
use std::fs;

use crate::cli::args::KeygenArgs;
use crate::exit_codes;

pub fn run(args: KeygenArgs) -> i32 {
    match run_keygen(args) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::GENERAL_FAILURE
        }
    }
}

fn run_keygen(args: KeygenArgs) -> Result<()> {
    if !args.out.exists() {
        fs::create_dir_all(&args.out)
            .with_context(|| format!("failed to create directory: {}", args.out.display()))?;
    }

    let private_path = args.out.join("private_key.pem");
    let public_path = args.out.join("public_key.pem");

    if !args.force {
        if private_path.exists() {
            anyhow::bail!("private key already exists: {} (use --force to overwrite)", private_path.display());
        }
        if public_path.exists() {
            anyhow::bail!("public key already exists: {} (use --force to overwrite)", public_path.display());
        }
    }

    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = VerifyingKey::from(&signing_key);

    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .context("failed to encode private key as PKCS#8 PEM")?;
    let public_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .context("failed to encode public key as SPKI PEM")?;

    fs::write(&private_path, private_pem.as_bytes())
        .with_context(|| format!("failed to write private key: {}", private_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on: {}", private_path.display()))?;
    }

    fs::write(&public_path, public_pem)
        .with_context(|| format!("failed to write public key: {}", public_path.display()))?;

    let key_id = caracal_mandate::compute_key_id_from_verifying_key(&verifying_key)?;

    println!("Generated ECDSA-P256 keypair:");
    println!("  Private key: {} (PKCS#8 PEM, mode 0600)", private_path.display());
    println!("  Public key:  {} (SPKI PEM)", public_path.display());
    println!();
    println!("key_id: {key_id}");
    println!();
    println!("Add this key_id to the trusted issuer key set to trust mandates signed by this key.");

    Ok(())
}
