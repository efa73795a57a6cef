//! Payloads for the `policy.changes` and `agent.lifecycle` topics.
//!
//! Like `caracal_mandate::mandate::events`, these are the event-bus payload
//! shapes the store hands to a publisher — `event_id` is assigned by the
//! ledger writer at append time, not here.

use crate::policy::{AuthorityPolicy, PolicyChangeKind};
use crate::principal::Principal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyChangeEvent {
    pub timestamp: DateTime<Utc>,
    pub policy_id: String,
    pub principal_id: String,
    pub change_type: PolicyChangeKind,
    pub changed_by: String,
    pub change_reason: String,
    pub version_number: u32,
    pub before: Option<AuthorityPolicy>,
    pub after: AuthorityPolicy,
}

impl PolicyChangeEvent {
    pub fn new(
        change_type: PolicyChangeKind,
        before: Option<AuthorityPolicy>,
        after: AuthorityPolicy,
        changed_by: impl Into<String>,
        change_reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: now,
            policy_id: after.policy_id.clone(),
            principal_id: after.principal_id.clone(),
            change_type,
            changed_by: changed_by.into(),
            change_reason: change_reason.into(),
            version_number: after.version_number,
            before,
            after,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalLifecycle {
    Created,
    Updated,
    Deactivated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalLifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub principal_id: String,
    pub lifecycle: PrincipalLifecycle,
}

impl PrincipalLifecycleEvent {
    pub fn created(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            principal_id: principal.principal_id.clone(),
            lifecycle: PrincipalLifecycle::Created,
        }
    }

    pub fn deactivated(principal: &Principal, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            principal_id: principal.principal_id.clone(),
            lifecycle: PrincipalLifecycle::Deactivated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::PrincipalType;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap()
    }

    fn policy(version_number: u32) -> AuthorityPolicy {
        AuthorityPolicy {
            policy_id: "p1".into(),
            principal_id: "agent-1".into(),
            allowed_resource_patterns: vec!["api:openai:*".into()],
            allowed_actions: vec!["api_call".into()],
            max_validity_seconds: 3600,
            allow_delegation: true,
            max_delegation_depth: 3,
            active: true,
            created_at: now(),
            created_by: "admin-1".into(),
            version_number,
        }
    }

    #[test]
    fn created_event_has_no_before() {
        let event = PolicyChangeEvent::new(
            PolicyChangeKind::Created,
            None,
            policy(1),
            "admin-1",
            "initial policy",
            now(),
        );
        assert!(event.before.is_none());
        assert_eq!(event.version_number, 1);
    }

    #[test]
    fn modified_event_carries_before_and_after() {
        let before = policy(1);
        let after = policy(2);
        let event = PolicyChangeEvent::new(
            PolicyChangeKind::Modified,
            Some(before.clone()),
            after,
            "admin-1",
            "widened scope",
            now(),
        );
        assert_eq!(event.before.unwrap().version_number, before.version_number);
        assert_eq!(event.change_type, PolicyChangeKind::Modified);
    }

    #[test]
    fn principal_created_event() {
        let principal = Principal {
            principal_id: "agent-1".into(),
            name: "agent-1".into(),
            owner: "ops".into(),
            principal_type: PrincipalType::Agent,
            parent_id: None,
            public_key: None,
            active: true,
            created_at: now(),
        };
        let event = PrincipalLifecycleEvent::created(&principal, now());
        assert_eq!(event.lifecycle, PrincipalLifecycle::Created);
        assert_eq!(event.principal_id, "agent-1");
    }
}
