//! Mandate manager: issuance, delegation, and revocation.
//!
//! This is the write side of the mandate lifecycle. It sits on top of the
//! mandate store, the policy store, and `caracal_mandate`'s signing and
//! scope-subset primitives, and is the only place that is allowed to mint a
//! signed mandate or flip a revocation flag. The evaluator stays pure and
//! never calls back into this module.
//!
//! Every state transition durably commits the mandate row first and then
//! publishes the corresponding event to the bus on a best-effort basis, the
//! same commit-then-publish ordering `caracal_policy::PolicyStore` uses for
//! `policy.changes` — the row is the source of truth, the event is a
//! notification of it.

use caracal_mandate::{
    sign_mandate, validate_delegation, Context, Intent, Mandate, MandateContent,
    MandateLifecycleEvent, Scope, Validity,
};
use caracal_policy::PolicyStore;
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::SigningKey;

use crate::error::CoreError;
use crate::event_bus::{EventBus, Topic};
use crate::mandate_store::MandateStore;

pub struct MandateManager {
    store: MandateStore,
    policies: PolicyStore,
    bus: EventBus,
}

impl MandateManager {
    pub fn new(store: MandateStore, policies: PolicyStore, bus: EventBus) -> Self {
        Self {
            store,
            policies,
            bus,
        }
    }

    /// Issue a root mandate. The issuer's active policy bounds what can be
    /// granted: requested scope must fall inside `allowed_resource_patterns`
    /// / `allowed_actions`, and the requested validity window must not
    /// exceed `max_validity_seconds`.
    pub fn issue(
        &self,
        issuer_id: &str,
        subject_id: &str,
        scope: Scope,
        validity_seconds: i64,
        intent: Option<Intent>,
        context: Context,
        signing_key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<Mandate, CoreError> {
        let policy = self
            .policies
            .get_active(issuer_id)
            .map_err(|e| CoreError::PolicyViolation {
                reason: e.to_string(),
            })?;

        if !scope
            .resource_scope
            .iter()
            .all(|r| policy.allowed_resource_patterns.iter().any(|p| {
                caracal_mandate::glob_matches(p, r).unwrap_or(false)
            }))
        {
            return Err(CoreError::PolicyViolation {
                reason: "requested resource scope exceeds the issuer's policy".to_string(),
            });
        }
        if !scope
            .action_scope
            .iter()
            .all(|a| policy.allowed_actions.iter().any(|p| {
                caracal_mandate::glob_matches(p, a).unwrap_or(false)
            }))
        {
            return Err(CoreError::PolicyViolation {
                reason: "requested action scope exceeds the issuer's policy".to_string(),
            });
        }
        if validity_seconds > policy.max_validity_seconds {
            return Err(CoreError::PolicyViolation {
                reason: format!(
                    "requested validity {validity_seconds}s exceeds policy maximum {}s",
                    policy.max_validity_seconds
                ),
            });
        }

        let content = MandateContent {
            issuer_id: issuer_id.to_string(),
            subject_id: subject_id.to_string(),
            scope,
            validity: Validity::new(now, now + Duration::seconds(validity_seconds)),
            parent_mandate_id: None,
            delegation_depth: 0,
            intent,
            context,
        };
        let mandate = sign_mandate(&content, signing_key)
            .map_err(|e| CoreError::MandateValidation { detail: e.to_string() })?;

        self.store.insert(&mandate)?;
        self.emit_mandate_issued(&mandate, now);
        Ok(mandate)
    }

    /// Delegate a narrower capability from an existing, live mandate. Subset
    /// checks are against the *parent mandate*, not the policy — a
    /// delegated mandate can never outscope the capability it descends
    /// from, even if the subject's own policy would have allowed more.
    pub fn delegate(
        &self,
        parent_mandate_id: &str,
        child_subject_id: &str,
        scope: Scope,
        validity_seconds: i64,
        intent: Option<Intent>,
        signing_key: &SigningKey,
        now: DateTime<Utc>,
    ) -> Result<Mandate, CoreError> {
        let parent = self.store.get(parent_mandate_id)?;
        if now > parent.content.validity.valid_until {
            return Err(CoreError::MandateValidation {
                detail: format!("parent mandate {parent_mandate_id} has expired"),
            });
        }

        let policy = self
            .policies
            .get_active(&parent.content.subject_id)
            .map_err(|e| CoreError::PolicyViolation {
                reason: e.to_string(),
            })?;
        let child_depth = parent.content.delegation_depth + 1;
        let valid_until = now + Duration::seconds(validity_seconds);
        let content = MandateContent {
            issuer_id: parent.content.subject_id.clone(),
            subject_id: child_subject_id.to_string(),
            scope,
            validity: Validity::new(now, valid_until),
            parent_mandate_id: Some(parent.mandate_id.clone()),
            delegation_depth: child_depth,
            intent,
            context: parent.content.context.clone(),
        };

        let validation = validate_delegation(&content, &parent, policy.max_delegation_depth);
        if !validation.valid {
            let detail = validation
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(CoreError::MandateValidation { detail });
        }

        let mandate = sign_mandate(&content, signing_key)
            .map_err(|e| CoreError::MandateValidation { detail: e.to_string() })?;

        self.store.insert(&mandate)?;
        self.emit_mandate_delegated(&mandate, now);
        Ok(mandate)
    }

    /// Revoke a mandate and, if `cascade`, every mandate transitively
    /// delegated from it. Idempotent: revoking an already-revoked mandate
    /// emits nothing and returns an empty list.
    pub fn revoke(
        &self,
        mandate_id: &str,
        revoked_by: &str,
        reason: &str,
        cascade: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, CoreError> {
        let mut revoked_ids = Vec::new();
        let mut frontier = vec![(mandate_id.to_string(), reason.to_string())];

        while let Some((id, reason_for_id)) = frontier.pop() {
            let changed = self.store.revoke(&id, revoked_by, &reason_for_id, now)?;
            if !changed {
                continue;
            }
            revoked_ids.push(id.clone());
            let mandate = self.store.get(&id)?;
            self.emit_mandate_revoked(&mandate, revoked_by, &reason_for_id, now);

            if cascade {
                for child in self.store.children_of(&id)? {
                    let cascaded_reason = format!("cascade from {id}");
                    frontier.push((child.mandate_id, cascaded_reason));
                }
            }
        }

        Ok(revoked_ids)
    }

    fn emit_mandate_issued(&self, mandate: &Mandate, now: DateTime<Utc>) {
        let mut event = MandateLifecycleEvent::issued(mandate, None);
        event.timestamp = now;
        let payload = serde_json::to_value(&event).expect("MandateLifecycleEvent always serializes");
        let _ = self
            .bus
            .produce(Topic::AuthorityEvents, &mandate.content.subject_id, &payload, now);
    }

    fn emit_mandate_delegated(&self, mandate: &Mandate, now: DateTime<Utc>) {
        let mut event = MandateLifecycleEvent::delegated(mandate, None);
        event.timestamp = now;
        let payload = serde_json::to_value(&event).expect("MandateLifecycleEvent always serializes");
        let _ = self
            .bus
            .produce(Topic::AuthorityEvents, &mandate.content.subject_id, &payload, now);
    }

    fn emit_mandate_revoked(&self, mandate: &Mandate, revoked_by: &str, reason: &str, now: DateTime<Utc>) {
        let mut event = MandateLifecycleEvent::revoked(mandate, revoked_by, reason, None);
        event.timestamp = now;
        let payload = serde_json::to_value(&event).expect("MandateLifecycleEvent always serializes");
        let _ = self.bus.produce(Topic::AuthorityEvents, &mandate.mandate_id, &payload, now);
    }
}
