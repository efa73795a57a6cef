//! Mandate lifecycle events on the `authority.events` topic.
//!
//! Payloads here cover the mandate-lifecycle subset of `authority.events`
//! (`mandate_issued`, `mandate_delegated`, `mandate_revoked`); the
//! evaluator's own `authority_decision` variant is built alongside the
//! evaluator, and `metering`/`policy.changes`/`agent.lifecycle` live next to
//! the stores that own those records. The wire format for every topic is
//! canonical JSON with a stable field order, matching the rest of the
//! content-addressing scheme in this crate.

use crate::mandate::types::Mandate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `kind` discriminant for the mandate-lifecycle slice of `authority.events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateEventKind {
    MandateIssued,
    MandateDelegated,
    MandateRevoked,
}

/// A mandate-lifecycle row on `authority.events`. `event_id` and
/// `prev_hash` are assigned by the ledger writer at append time, so they
/// are absent here — this type is the *payload* the mandate manager hands
/// to the event bus, not the persisted ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MandateLifecycleEvent {
    pub kind: MandateEventKind,
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub mandate_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_mandate_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl MandateLifecycleEvent {
    pub fn issued(mandate: &Mandate, correlation_id: Option<String>) -> Self {
        Self {
            kind: MandateEventKind::MandateIssued,
            timestamp: Utc::now(),
            principal_id: mandate.content.subject_id.clone(),
            mandate_id: mandate.mandate_id.clone(),
            parent_mandate_id: None,
            revocation_reason: None,
            correlation_id,
        }
    }

    pub fn delegated(mandate: &Mandate, correlation_id: Option<String>) -> Self {
        Self {
            kind: MandateEventKind::MandateDelegated,
            timestamp: Utc::now(),
            principal_id: mandate.content.subject_id.clone(),
            mandate_id: mandate.mandate_id.clone(),
            parent_mandate_id: mandate.content.parent_mandate_id.clone(),
            revocation_reason: None,
            correlation_id,
        }
    }

    pub fn revoked(
        mandate: &Mandate,
        revoked_by: impl Into<String>,
        reason: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            kind: MandateEventKind::MandateRevoked,
            timestamp: Utc::now(),
            principal_id: revoked_by.into(),
            mandate_id: mandate.mandate_id.clone(),
            parent_mandate_id: None,
            revocation_reason: Some(reason.into()),
            correlation_id,
        }
    }
}
