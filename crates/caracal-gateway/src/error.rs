//! HTTP error mapping for the gateway.
//!
//! Every rejection path — auth failure, replay, a denied mandate, an
//! unreachable policy store — ends up as one `ApiError` so the router has a
//! single `IntoResponse` to return. The status/code pairs for a plain
//! `CaracalError` follow the kind-to-HTTP table every crate in the workspace
//! shares; the gateway-specific cases (`mandate_not_found`, a mandate
//! evaluator denial, `policy_service_unavailable`) are overrides the
//! generic table doesn't cover, since the evaluator's `DenialKind` carries
//! more detail than `ErrorKind::MandateIntegrity` alone.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use caracal_common::{CaracalError, ErrorKind};
use caracal_core::DenialKind;
use serde_json::json;

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>, correlation_id: &str) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message, correlation_id)
    }

    pub fn mandate_not_found(correlation_id: &str) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "mandate_not_found",
            "no such mandate, or the presented mandate could not be resolved",
            correlation_id,
        )
    }

    pub fn denied(kind: Option<DenialKind>, reason: impl Into<String>, correlation_id: &str) -> Self {
        let code = match kind {
            Some(DenialKind::Expired) => "expired",
            Some(DenialKind::NotYetValid) => "not_yet_valid",
            Some(DenialKind::Revoked) => "revoked",
            Some(DenialKind::ActionOutOfScope) => "action_out_of_scope",
            Some(DenialKind::ResourceOutOfScope) => "resource_out_of_scope",
            Some(DenialKind::InvalidSignature) => "invalid_signature",
            Some(DenialKind::PolicyNotFound) => "policy_not_found",
            Some(DenialKind::ScopeEscalation) => "scope_escalation",
            None => "denied",
        };
        Self::new(StatusCode::FORBIDDEN, code, reason, correlation_id)
    }

    pub fn policy_service_unavailable(correlation_id: &str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "policy_service_unavailable",
            "policy store unreachable and no cached policy is within the degraded-mode window",
            correlation_id,
        )
    }

    pub fn upstream_timeout(correlation_id: &str) -> Self {
        Self::new(
            StatusCode::GATEWAY_TIMEOUT,
            "upstream_timeout",
            "downstream request did not complete before its deadline",
            correlation_id,
        )
    }

    pub fn unauthenticated(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message, correlation_id)
    }

    pub fn replayed(message: impl Into<String>, correlation_id: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, "replay_detected", message, correlation_id)
    }

    pub fn from_caracal_error(err: &CaracalError, correlation_id: &str) -> Self {
        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::MandateIntegrity => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Transient => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match err.kind() {
            ErrorKind::Validation => "validation",
            ErrorKind::MandateIntegrity => "mandate_integrity",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        };
        Self::new(status, code, err.to_string(), correlation_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.code, "message": self.message },
        }));
        let mut response = (self.status, body).into_response();
        if let Ok(value) = self.correlation_id.parse() {
            response.headers_mut().insert("x-caracal-correlation-id", value);
        }
        response
    }
}
