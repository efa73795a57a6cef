//! The pure authority evaluator.
//!
//! `decide` holds no state, performs no I/O, and never panics — every input
//! it needs (the mandate chain, the signer's public key) is handed in by the
//! caller, which is the mandate manager or the gateway's request pipeline.
//! Any internal inconsistency (a dangling parent link, a mandate with no
//! signature) is treated as a denial rather than an error, since a request
//! that cannot be proven safe must not be let through.
//!
//! The nine checks below run in a fixed order and short-circuit on the
//! first failure, mirroring the ordered validity/scope/delegation checks in
//! a mandate authorizer, generalized here into a pure function with an
//! explicit, recursively-evaluated delegation chain instead of a database
//! lookup.

use std::collections::HashMap;

use caracal_mandate::{glob_matches, verify_mandate, Mandate, VerifyingKey};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialKind {
    Expired,
    NotYetValid,
    Revoked,
    ActionOutOfScope,
    ResourceOutOfScope,
    InvalidSignature,
    PolicyNotFound,
    ScopeEscalation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub denial_kind: Option<DenialKind>,
}

impl Decision {
    fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            denial_kind: None,
        }
    }

    fn deny(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            denial_kind: Some(kind),
        }
    }
}

/// Decides whether `chain.last()` authorizes `action` on `resource` at
/// `now`. `chain` must be ordered root-first, leaf-last, with each
/// mandate's `parent_mandate_id` pointing at the previous element — the
/// caller (which owns the mandate store) is responsible for assembling it;
/// the evaluator treats a broken link as `PolicyNotFound` rather than
/// walking off to fetch the real parent itself.
///
/// `trusted_keys` maps a signer's `key_id` to its public key. A mandate
/// signed by an unknown key fails closed with `InvalidSignature`, the same
/// as a missing or malformed signature.
pub fn decide(
    chain: &[Mandate],
    trusted_keys: &HashMap<String, VerifyingKey>,
    action: &str,
    resource: &str,
    now: DateTime<Utc>,
) -> Decision {
    let Some(mandate) = chain.last() else {
        return Decision::deny(DenialKind::PolicyNotFound, "no mandate presented");
    };

    if let Err(reason) = verify_signature(mandate, trusted_keys) {
        return Decision::deny(DenialKind::InvalidSignature, reason);
    }

    if mandate.revoked {
        return Decision::deny(
            DenialKind::Revoked,
            format!(
                "mandate {} was revoked: {}",
                mandate.mandate_id,
                mandate.revocation_reason.as_deref().unwrap_or("no reason given")
            ),
        );
    }

    if now < mandate.content.validity.valid_from {
        return Decision::deny(
            DenialKind::NotYetValid,
            format!("mandate not valid until {}", mandate.content.validity.valid_from),
        );
    }

    if now > mandate.content.validity.valid_until {
        return Decision::deny(
            DenialKind::Expired,
            format!("mandate expired at {}", mandate.content.validity.valid_until),
        );
    }

    if !matches_any(&mandate.content.scope.action_scope, action) {
        return Decision::deny(
            DenialKind::ActionOutOfScope,
            format!("action {action} is not in the mandate's action scope"),
        );
    }

    if !matches_any(&mandate.content.scope.resource_scope, resource) {
        return Decision::deny(
            DenialKind::ResourceOutOfScope,
            format!("resource {resource} is not in the mandate's resource scope"),
        );
    }

    if let Some(parent_id) = &mandate.content.parent_mandate_id {
        let Some((_, parent_chain)) = chain.split_last() else {
            return Decision::deny(
                DenialKind::PolicyNotFound,
                "mandate declares a parent but no chain was supplied",
            );
        };
        let Some(parent) = parent_chain.last() else {
            return Decision::deny(
                DenialKind::PolicyNotFound,
                "mandate declares a parent but no chain was supplied",
            );
        };
        if &parent.mandate_id != parent_id {
            return Decision::deny(
                DenialKind::PolicyNotFound,
                format!(
                    "chain is inconsistent: mandate's parent_mandate_id {parent_id} does not \
                     match the supplied parent {}",
                    parent.mandate_id
                ),
            );
        }

        let parent_decision = decide(parent_chain, trusted_keys, action, resource, now);
        if !parent_decision.allowed {
            return Decision::deny(
                DenialKind::ScopeEscalation,
                format!(
                    "delegation chain denied by ancestor {}: {}",
                    parent.mandate_id, parent_decision.reason
                ),
            );
        }
    }

    Decision::allow(format!(
        "mandate {} authorizes {action} on {resource}",
        mandate.mandate_id
    ))
}

fn matches_any(patterns: &[String], candidate: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| glob_matches(pattern, candidate).unwrap_or(false))
}

fn verify_signature(
    mandate: &Mandate,
    trusted_keys: &HashMap<String, VerifyingKey>,
) -> Result<(), String> {
    let signature = mandate
        .signature
        .as_ref()
        .ok_or_else(|| "mandate is not signed".to_string())?;
    let key = trusted_keys
        .get(&signature.key_id)
        .ok_or_else(|| format!("key {} is not trusted", signature.key_id))?;
    verify_mandate(mandate, key)
        .map(|_| ())
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use caracal_mandate::{sign_mandate, Context, MandateContent, Scope, SigningKey, Validity};
    use chrono::{Duration, TimeZone};
    use rand_core::OsRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
    }

    fn keypair() -> (SigningKey, VerifyingKey) {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        (signing_key, verifying_key)
    }

    fn issue(
        signing_key: &SigningKey,
        key_id: &str,
        resource_scope: Vec<&str>,
        action_scope: Vec<&str>,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        parent_mandate_id: Option<String>,
    ) -> Mandate {
        let content = MandateContent {
            issuer_id: "agent-issuer".into(),
            subject_id: "agent-subject".into(),
            scope: Scope::new(
                resource_scope.into_iter().map(str::to_string).collect(),
                action_scope.into_iter().map(str::to_string).collect(),
            ),
            validity: Validity::new(valid_from, valid_until),
            parent_mandate_id,
            delegation_depth: 0,
            intent: None,
            context: Context::new("org/app", "caracal"),
        };
        let mut mandate = sign_mandate(&content, signing_key).unwrap();
        mandate.signature.as_mut().unwrap().key_id = key_id.to_string();
        mandate
    }

    #[test]
    fn allows_a_matching_request_within_validity() {
        let (sk, vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "api_call", "api:openai:chat", now());
        assert!(decision.allowed);
    }

    #[test]
    fn denies_expired_mandate() {
        let (sk, vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::hours(2),
            now() - Duration::hours(1),
            None,
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "api_call", "api:openai:chat", now());
        assert!(!decision.allowed);
        assert_eq!(decision.denial_kind, Some(DenialKind::Expired));
    }

    #[test]
    fn denies_not_yet_valid_mandate() {
        let (sk, vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() + Duration::hours(1),
            now() + Duration::hours(2),
            None,
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::NotYetValid));
    }

    #[test]
    fn denies_revoked_mandate() {
        let (sk, vk) = keypair();
        let mut mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        mandate.revoked = true;
        mandate.revocation_reason = Some("compromised key".into());
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::Revoked));
    }

    #[test]
    fn denies_action_out_of_scope() {
        let (sk, vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "delete", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::ActionOutOfScope));
    }

    #[test]
    fn denies_resource_out_of_scope() {
        let (sk, vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[mandate], &keys, "api_call", "db:prod:orders", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::ResourceOutOfScope));
    }

    #[test]
    fn denies_untrusted_signing_key() {
        let (sk, _vk) = keypair();
        let mandate = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let decision = decide(&[mandate], &HashMap::new(), "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::InvalidSignature));
    }

    #[test]
    fn allows_a_delegated_mandate_within_parent_scope() {
        let (sk, vk) = keypair();
        let root = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let child = issue(
            &sk,
            "key-1",
            vec!["api:openai:chat"],
            vec!["api_call"],
            now() - Duration::minutes(1),
            now() + Duration::minutes(30),
            Some(root.mandate_id.clone()),
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[root, child], &keys, "api_call", "api:openai:chat", now());
        assert!(decision.allowed);
    }

    #[test]
    fn denies_delegation_when_the_parent_is_expired() {
        let (sk, vk) = keypair();
        let root = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::hours(2),
            now() - Duration::hours(1),
            None,
        );
        let child = issue(
            &sk,
            "key-1",
            vec!["api:openai:chat"],
            vec!["api_call"],
            now() - Duration::minutes(1),
            now() + Duration::minutes(30),
            Some(root.mandate_id.clone()),
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[root, child], &keys, "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::ScopeEscalation));
    }

    #[test]
    fn denies_broken_chain_linkage() {
        let (sk, vk) = keypair();
        let unrelated = issue(
            &sk,
            "key-1",
            vec!["api:openai:*"],
            vec!["api_call"],
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            None,
        );
        let child = issue(
            &sk,
            "key-1",
            vec!["api:openai:chat"],
            vec!["api_call"],
            now() - Duration::minutes(1),
            now() + Duration::minutes(30),
            Some("some-other-mandate-id".into()),
        );
        let mut keys = HashMap::new();
        keys.insert("key-1".to_string(), vk);

        let decision = decide(&[unrelated, child], &keys, "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::PolicyNotFound));
    }

    #[test]
    fn denies_when_no_mandate_is_presented() {
        let decision = decide(&[], &HashMap::new(), "api_call", "api:openai:chat", now());
        assert_eq!(decision.denial_kind, Some(DenialKind::PolicyNotFound));
    }
}
