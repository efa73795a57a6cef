//! Snapshot and replay.
//!
//! A snapshot is a consistent, signed dump of identity, policy, and
//! mandate state as of a single ledger event id — the same three stores
//! `caracal-policy` and this crate's `MandateStore` already own, read
//! without mutation and stamped with the high-water mark. It exists so an
//! operator (or a disaster-recovery restore) never has to replay the
//! ledger from event 1 to reconstruct current state.
//!
//! Replay itself is the event bus's job (`EventBus::start_replay`); this
//! module only produces the point a replay can be bounded against.

use caracal_mandate::Mandate;
use caracal_policy::{AuthorityPolicy, Principal, PolicyStore, PrincipalStore};
use chrono::{DateTime, Utc};
use ecdsa::signature::Signer;
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::mandate_store::MandateStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    pub last_included_event_id: i64,
    pub principals: Vec<Principal>,
    pub active_policies: Vec<AuthorityPolicy>,
    pub live_mandates: Vec<Mandate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedSnapshot {
    pub snapshot: Snapshot,
    pub signature: String,
    pub signer_key_id: String,
}

/// Build a consistent snapshot as of `last_included_event_id`. Callers
/// should have just force-closed the ledger's current batch (see
/// `Ledger::close_batch`) so the watermark falls on a signed batch boundary.
pub fn build_snapshot(
    principals: &PrincipalStore,
    policies: &PolicyStore,
    mandates: &MandateStore,
    last_included_event_id: i64,
    now: DateTime<Utc>,
) -> Result<Snapshot, CoreError> {
    let principals = principals.list_active().map_err(|e| CoreError::Database(e.to_string()))?;
    let active_policies = policies.list_active().map_err(|e| CoreError::Database(e.to_string()))?;
    let live_mandates = mandates.list_live(now)?;

    Ok(Snapshot {
        snapshot_id: format!("snapshot:{}", uuid::Uuid::new_v4()),
        created_at: now,
        last_included_event_id,
        principals,
        active_policies,
        live_mandates,
    })
}

/// Canonicalize and sign a snapshot so a restore can verify it hasn't been
/// tampered with in transit or at rest, the same detached-signature pattern
/// the data model uses for Merkle batches.
pub fn sign_snapshot(
    snapshot: Snapshot,
    signing_key: &SigningKey,
    signer_key_id: &str,
) -> Result<SignedSnapshot, CoreError> {
    let canonical = serde_jcs::to_string(&snapshot)
        .map_err(|e| CoreError::MandateValidation { detail: e.to_string() })?;
    let signature: EcdsaSignature = signing_key.sign(canonical.as_bytes());
    Ok(SignedSnapshot {
        snapshot,
        signature: hex::encode(signature.to_bytes()),
        signer_key_id: signer_key_id.to_string(),
    })
}
