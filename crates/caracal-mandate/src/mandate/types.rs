//! Execution mandate data model.
//!
//! Field set and invariants follow the data model exactly: a mandate is a
//! signed capability scoped by resource/action glob patterns, bounded by a
//! validity window, optionally chained to a parent via delegation, and
//! carrying an opaque `intent` the evaluator never interprets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payload type tag carried in the pre-authentication encoding, guarding
/// against type confusion between a mandate and any other signed payload.
pub const MANDATE_PAYLOAD_TYPE: &str = "application/vnd.caracal.mandate+json;v=1";

/// How a principal authenticated when it issued or bore a mandate. Carried
/// into audit events for traceability; never interpreted by the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Oidc,
    ApiKey,
    Mtls,
}

/// A principal reference as it appears inside a mandate: just enough to
/// name who issued or bears the capability. The authoritative `Principal`
/// record, with delegation edges and lifecycle, lives in the identity
/// store, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque identifier. MUST NOT contain email, name, or other PII.
    pub principal_id: String,
    pub auth_method: AuthMethod,
}

impl Principal {
    pub fn new(principal_id: impl Into<String>, auth_method: AuthMethod) -> Self {
        Self {
            principal_id: principal_id.into(),
            auth_method,
        }
    }
}

/// Resource and action glob patterns a mandate authorizes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub resource_scope: Vec<String>,
    pub action_scope: Vec<String>,
}

impl Scope {
    pub fn new(resource_scope: Vec<String>, action_scope: Vec<String>) -> Self {
        Self {
            resource_scope,
            action_scope,
        }
    }

    /// `self` is a subset of `parent` iff every pattern `self` carries also
    /// appears, verbatim, in `parent`'s pattern list. The mandate manager
    /// enforces this at delegation time rather than the evaluator, since
    /// pattern-set subset is a structural check, not a runtime decision.
    pub fn is_subset_of(&self, parent: &Scope) -> bool {
        self.resource_scope
            .iter()
            .all(|p| parent.resource_scope.contains(p))
            && self
                .action_scope
                .iter()
                .all(|p| parent.action_scope.contains(p))
    }
}

/// The validity window of a mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Validity {
    pub fn new(valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self {
            valid_from,
            valid_until,
        }
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.valid_until - self.valid_from).num_seconds()
    }

    /// Check validity at a given instant, honoring a clock-skew tolerance
    /// on both edges of the window.
    pub fn is_valid_at(&self, now: DateTime<Utc>, skew_seconds: i64) -> bool {
        let skew = chrono::Duration::seconds(skew_seconds);
        now + skew >= self.valid_from && now - skew < self.valid_until
    }
}

/// Application context carried into every event emitted for this mandate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Target application identifier, `{org}/{app}` or `{org}/{app}/{env}`.
    pub app_id: String,
    /// Signing authority identifier.
    pub issuer_domain: String,
}

impl Context {
    pub fn new(app_id: impl Into<String>, issuer_domain: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            issuer_domain: issuer_domain.into(),
        }
    }
}

/// Structured description of *why* the mandate was issued. Carried as-is
/// into audit events; the evaluator never interprets it.
pub type Intent = serde_json::Value;

/// The signature envelope. `algorithm` is always `"ES256"` (ECDSA-P256 with
/// a SHA-256 pre-hash); `key_id` lets a verifier locate the signer's public
/// key without a side channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: String,
    pub payload_type: String,
    /// SHA-256 of the signed payload bytes (DSSE pre-authentication
    /// encoding), independent of `mandate_id`.
    pub signed_payload_digest: String,
    pub key_id: String,
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

/// The hashable/signable content of a mandate: every field *except*
/// `revoked*`, since revocation metadata changes after issuance but the
/// signature covering the capability itself must not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandateContent {
    pub issuer_id: String,
    pub subject_id: String,
    pub scope: Scope,
    pub validity: Validity,
    pub parent_mandate_id: Option<String>,
    pub delegation_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    pub context: Context,
}

impl MandateContent {
    /// Attach a freshly minted `mandate_id` to produce an unsigned mandate.
    pub fn into_mandate(self, mandate_id: String) -> Mandate {
        Mandate {
            mandate_id,
            content: self,
            signature: None,
            revoked: false,
            revoked_at: None,
            revoked_by: None,
            revocation_reason: None,
        }
    }
}

/// A complete, optionally-signed mandate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: String,
    #[serde(flatten)]
    pub content: MandateContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub revocation_reason: Option<String>,
}

impl Mandate {
    pub fn builder() -> MandateBuilder {
        MandateBuilder::default()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_root(&self) -> bool {
        self.content.parent_mandate_id.is_none()
    }
}

/// Errors raised while assembling a `MandateContent`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MandateBuildError {
    #[error("valid_from must be <= valid_until")]
    InvalidValidityWindow,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Builder for a `MandateContent`.
#[derive(Debug, Default)]
pub struct MandateBuilder {
    issuer_id: Option<String>,
    subject_id: Option<String>,
    scope: Option<Scope>,
    validity: Option<Validity>,
    parent_mandate_id: Option<String>,
    delegation_depth: u32,
    intent: Option<Intent>,
    context: Option<Context>,
}

impl MandateBuilder {
    pub fn issuer(mut self, issuer_id: impl Into<String>) -> Self {
        self.issuer_id = Some(issuer_id.into());
        self
    }

    pub fn subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn validity(mut self, validity: Validity) -> Self {
        self.validity = Some(validity);
        self
    }

    pub fn parent(mut self, parent_mandate_id: impl Into<String>, delegation_depth: u32) -> Self {
        self.parent_mandate_id = Some(parent_mandate_id.into());
        self.delegation_depth = delegation_depth;
        self
    }

    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }

    pub fn build(self) -> Result<MandateContent, MandateBuildError> {
        let validity = self
            .validity
            .ok_or(MandateBuildError::MissingField("validity"))?;
        if validity.valid_from > validity.valid_until {
            return Err(MandateBuildError::InvalidValidityWindow);
        }
        Ok(MandateContent {
            issuer_id: self
                .issuer_id
                .ok_or(MandateBuildError::MissingField("issuer_id"))?,
            subject_id: self
                .subject_id
                .ok_or(MandateBuildError::MissingField("subject_id"))?,
            scope: self.scope.unwrap_or_default(),
            validity,
            parent_mandate_id: self.parent_mandate_id,
            delegation_depth: self.delegation_depth,
            intent: self.intent,
            context: self.context.unwrap_or_default(),
        })
    }
}
