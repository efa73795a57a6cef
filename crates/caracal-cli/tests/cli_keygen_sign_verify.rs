use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use tempfile::tempdir;

fn caracal() -> Command {
    Command::cargo_bin("caracal").expect("caracal binary should be built")
}

fn sample_content() -> Value {
    json!({
        "issuer_id": "principal:issuer-1",
        "subject_id": "principal:agent-1",
        "scope": {
            "resource_scope": ["api:openai:*"],
            "action_scope": ["invoke"]
        },
        "validity": {
            "valid_from": "2026-01-01T00:00:00Z",
            "valid_until": "2026-01-02T00:00:00Z"
        },
        "parent_mandate_id": null,
        "delegation_depth": 0,
        "context": {
            "app_id": "acme/billing",
            "issuer_domain": "acme.example"
        }
    })
}

#[test]
fn keygen_writes_pkcs8_and_spki_pem() {
    let dir = tempdir().unwrap();

    caracal()
        .args(["keygen", "--out"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicates::str::contains("key_id:"));

    let private = fs::read_to_string(dir.path().join("private_key.pem")).unwrap();
    let public = fs::read_to_string(dir.path().join("public_key.pem")).unwrap();
    assert!(private.contains("BEGIN PRIVATE KEY"));
    assert!(public.contains("BEGIN PUBLIC KEY"));
}

#[test]
fn keygen_refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    caracal().args(["keygen", "--out"]).arg(dir.path()).assert().success();
    caracal().args(["keygen", "--out"]).arg(dir.path()).assert().failure();
    caracal()
        .args(["keygen", "--out"])
        .arg(dir.path())
        .arg("--force")
        .assert()
        .success();
}

#[test]
fn sign_then_verify_round_trip_succeeds() {
    let dir = tempdir().unwrap();
    caracal().args(["keygen", "--out"]).arg(dir.path()).assert().success();

    let content_path = dir.path().join("content.json");
    fs::write(&content_path, serde_json::to_string(&sample_content()).unwrap()).unwrap();

    let mandate_path = dir.path().join("mandate.json");
    caracal()
        .arg("sign")
        .arg(&content_path)
        .args(["--key"])
        .arg(dir.path().join("private_key.pem"))
        .args(["--out"])
        .arg(&mandate_path)
        .assert()
        .success();

    caracal()
        .arg("verify")
        .arg(&mandate_path)
        .args(["--pubkey"])
        .arg(dir.path().join("public_key.pem"))
        .assert()
        .success()
        .stdout(predicates::str::contains("VALID"));
}

#[test]
fn verify_fails_closed_on_tampered_mandate() {
    let dir = tempdir().unwrap();
    caracal().args(["keygen", "--out"]).arg(dir.path()).assert().success();

    let content_path = dir.path().join("content.json");
    fs::write(&content_path, serde_json::to_string(&sample_content()).unwrap()).unwrap();

    let mandate_path = dir.path().join("mandate.json");
    caracal()
        .arg("sign")
        .arg(&content_path)
        .args(["--key"])
        .arg(dir.path().join("private_key.pem"))
        .args(["--out"])
        .arg(&mandate_path)
        .assert()
        .success();

    let mut mandate: Value =
        serde_json::from_str(&fs::read_to_string(&mandate_path).unwrap()).unwrap();
    mandate["subject_id"] = json!("principal:attacker");
    fs::write(&mandate_path, serde_json::to_string(&mandate).unwrap()).unwrap();

    caracal()
        .arg("verify")
        .arg("--quiet")
        .arg(&mandate_path)
        .args(["--pubkey"])
        .arg(dir.path().join("public_key.pem"))
        .assert()
        .failure()
        .code(4);
}

#[test]
fn verify_rejects_key_not_trusted() {
    let issuer_dir = tempdir().unwrap();
    let other_dir = tempdir().unwrap();
    caracal().args(["keygen", "--out"]).arg(issuer_dir.path()).assert().success();
    caracal().args(["keygen", "--out"]).arg(other_dir.path()).assert().success();

    let content_path = issuer_dir.path().join("content.json");
    fs::write(&content_path, serde_json::to_string(&sample_content()).unwrap()).unwrap();

    let mandate_path = issuer_dir.path().join("mandate.json");
    caracal()
        .arg("sign")
        .arg(&content_path)
        .args(["--key"])
        .arg(issuer_dir.path().join("private_key.pem"))
        .args(["--out"])
        .arg(&mandate_path)
        .assert()
        .success();

    caracal()
        .arg("verify")
        .arg("--quiet")
        .arg(&mandate_path)
        .args(["--pubkey"])
        .arg(other_dir.path().join("public_key.pem"))
        .assert()
        .failure();
}
