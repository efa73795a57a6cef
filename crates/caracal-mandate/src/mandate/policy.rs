//! Delegation invariant checks.
//!
//! A delegated mandate's scope and validity window are bounded by its
//! immediate parent, not directly by the issuing principal's authority
//! policy — policy-level checks (`scope ⊆ policy.allowed_resource_patterns`,
//! `max_delegation_depth`) live in `caracal-policy` where the policy record
//! itself is stored. This module owns the structural half: given a parent
//! mandate and a proposed child, does the child actually narrow the
//! parent's capability.

use crate::mandate::glob::GlobPattern;
use crate::mandate::types::{Mandate, MandateContent};
use serde::{Deserialize, Serialize};

/// A child pattern is within a parent's scope if some parent pattern,
/// read as a glob, matches the child pattern's literal text — so
/// `"api:openai:chat"` narrows `"api:openai:*"`, and `"api:openai:*"`
/// itself narrows `"api:*"`. An unparseable parent pattern can't bound
/// anything, so it matches nothing rather than everything.
fn within_scope(child_patterns: &[String], parent_patterns: &[String]) -> bool {
    child_patterns.iter().all(|child| {
        parent_patterns.iter().any(|parent| {
            GlobPattern::new(parent).map(|g| g.matches(child)).unwrap_or(false)
        })
    })
}

/// Validation result for a proposed child mandate against its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationValidation {
    pub valid: bool,
    pub errors: Vec<DelegationError>,
}

impl DelegationValidation {
    pub fn pass() -> Self {
        Self {
            valid: true,
            errors: vec![],
        }
    }
}

/// A single delegation invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DelegationError {
    #[error("child resource_scope is not a subset of parent resource_scope")]
    ResourceScopeEscalation,

    #[error("child action_scope is not a subset of parent action_scope")]
    ActionScopeEscalation,

    #[error("child valid_until ({child}) exceeds parent valid_until ({parent})")]
    ValidityEscalation {
        child: chrono::DateTime<chrono::Utc>,
        parent: chrono::DateTime<chrono::Utc>,
    },

    #[error("child delegation_depth {child} is not parent depth {parent} + 1")]
    DepthMismatch { child: u32, parent: u32 },

    #[error("delegation depth {depth} exceeds policy maximum {max_depth}")]
    MaxDepthExceeded { depth: u32, max_depth: u32 },

    #[error("parent mandate is revoked")]
    ParentRevoked,
}

/// Validate a proposed child mandate's content against its parent mandate
/// and the issuing principal's `max_delegation_depth`.
///
/// Every invariant is checked independently so a caller can report every
/// violation at once, rather than stopping at the first.
pub fn validate_delegation(
    child: &MandateContent,
    parent: &Mandate,
    max_delegation_depth: u32,
) -> DelegationValidation {
    let mut errors = Vec::new();

    if parent.revoked {
        errors.push(DelegationError::ParentRevoked);
    }

    if !within_scope(&child.scope.resource_scope, &parent.content.scope.resource_scope) {
        errors.push(DelegationError::ResourceScopeEscalation);
    }

    if !within_scope(&child.scope.action_scope, &parent.content.scope.action_scope) {
        errors.push(DelegationError::ActionScopeEscalation);
    }

    if child.validity.valid_until > parent.content.validity.valid_until {
        errors.push(DelegationError::ValidityEscalation {
            child: child.validity.valid_until,
            parent: parent.content.validity.valid_until,
        });
    }

    let expected_depth = parent.content.delegation_depth + 1;
    if child.delegation_depth != expected_depth {
        errors.push(DelegationError::DepthMismatch {
            child: child.delegation_depth,
            parent: parent.content.delegation_depth,
        });
    } else if expected_depth > max_delegation_depth {
        errors.push(DelegationError::MaxDepthExceeded {
            depth: expected_depth,
            max_depth: max_delegation_depth,
        });
    }

    if errors.is_empty() {
        DelegationValidation::pass()
    } else {
        DelegationValidation {
            valid: false,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mandate::types::{Context, Scope, Validity};
    use chrono::{TimeZone, Utc};

    fn parent_mandate() -> Mandate {
        let content = MandateContent {
            issuer_id: "root".to_string(),
            subject_id: "agent-1".to_string(),
            scope: Scope::new(
                vec!["api:openai:*".to_string(), "db:read:*".to_string()],
                vec!["api_call".to_string()],
            ),
            validity: Validity::new(
                Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 28, 18, 0, 0).unwrap(),
            ),
            parent_mandate_id: None,
            delegation_depth: 0,
            intent: None,
            context: Context::new("myorg/app", "auth.myorg.com"),
        };
        content.into_mandate("parent-id".to_string())
    }

    fn valid_child() -> MandateContent {
        MandateContent {
            issuer_id: "agent-1".to_string(),
            subject_id: "agent-2".to_string(),
            scope: Scope::new(vec!["api:openai:*".to_string()], vec!["api_call".to_string()]),
            validity: Validity::new(
                Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap(),
            ),
            parent_mandate_id: Some("parent-id".to_string()),
            delegation_depth: 1,
            intent: None,
            context: Context::new("myorg/app", "auth.myorg.com"),
        }
    }

    #[test]
    fn valid_delegation_passes() {
        let result = validate_delegation(&valid_child(), &parent_mandate(), 5);
        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn resource_scope_escalation_detected() {
        let mut child = valid_child();
        child.scope.resource_scope = vec!["api:anthropic:*".to_string()];
        let result = validate_delegation(&child, &parent_mandate(), 5);
        assert!(!result.valid);
        assert!(result
            .errors
            .contains(&DelegationError::ResourceScopeEscalation));
    }

    #[test]
    fn delegate_narrower_scope_succeeds() {
        let mut child = valid_child();
        child.scope.resource_scope = vec!["api:openai:chat".to_string()];
        let result = validate_delegation(&child, &parent_mandate(), 5);
        assert!(result.valid, "narrowing api:openai:* to api:openai:chat should be allowed: {:?}", result.errors);
    }

    #[test]
    fn delegate_wider_scope_rejected() {
        let mut child = valid_child();
        child.scope.resource_scope = vec!["api:*".to_string()];
        let result = validate_delegation(&child, &parent_mandate(), 5);
        assert!(!result.valid);
        assert!(result
            .errors
            .contains(&DelegationError::ResourceScopeEscalation));
    }

    #[test]
    fn validity_escalation_detected() {
        let mut child = valid_child();
        child.validity.valid_until = Utc.with_ymd_and_hms(2026, 1, 28, 23, 0, 0).unwrap();
        let result = validate_delegation(&child, &parent_mandate(), 5);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, DelegationError::ValidityEscalation { .. })));
    }

    #[test]
    fn depth_must_be_parent_plus_one() {
        let mut child = valid_child();
        child.delegation_depth = 3;
        let result = validate_delegation(&child, &parent_mandate(), 5);
        assert!(!result.valid);
        assert!(result
            .errors
            .contains(&DelegationError::DepthMismatch { child: 3, parent: 0 }));
    }

    #[test]
    fn max_depth_enforced() {
        let child = valid_child();
        let result = validate_delegation(&child, &parent_mandate(), 0);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| matches!(
            e,
            DelegationError::MaxDepthExceeded {
                depth: 1,
                max_depth: 0
            }
        )));
    }

    #[test]
    fn revoked_parent_rejected() {
        let mut parent = parent_mandate();
        parent.revoked = true;
        let result = validate_delegation(&valid_child(), &parent, 5);
        assert!(!result.valid);
        assert!(result.errors.contains(&DelegationError::ParentRevoked));
    }
}
