//! The gateway's HTTP surface: `POST /*` (the proxy path), `GET /health`,
//! `GET /stats`.
//!
//! `handle_proxy` is the six-step sequence end to end: authenticate,
//! replay-protect, load the mandate, decide, forward or degrade. Every
//! early return already carries a correlation id so a denied or failed
//! request is traceable from the response alone.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use caracal_core::event_bus::Topic;
use caracal_core::decide;
use caracal_mandate::decode_wire_form;
use caracal_policy::PolicyError;
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiError;
use crate::forward::{filter_response_headers, parse_target_url, ForwardError};
use crate::policy_cache::CachedPolicy;
use crate::state::AppState;

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/*path", post(handle_proxy))
        .with_state(state)
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn handle_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.policy_cache.stats();
    Json(json!({
        "policy_cache": {
            "hits": stats.hits,
            "misses": stats.misses,
            "evictions": stats.evictions,
            "invalidations": stats.invalidations,
            "size": stats.size,
        },
    }))
}

async fn handle_proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let correlation_id = header_str(&headers, "x-caracal-correlation-id")
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let principal_id = authenticate(&state, &headers, &correlation_id).await?;

    if let (Some(nonce), Some(ts)) = (
        header_str(&headers, "x-caracal-nonce"),
        header_str(&headers, "x-caracal-timestamp"),
    ) {
        let timestamp = parse_timestamp(ts)
            .ok_or_else(|| ApiError::bad_request("X-Caracal-Timestamp is not a valid unix timestamp", &correlation_id))?;
        state
            .replay_guard
            .check_and_record(nonce, timestamp, now)
            .map_err(|e| ApiError::replayed(e.to_string(), &correlation_id))?;
    }

    let target_raw = header_str(&headers, "x-caracal-target-url")
        .ok_or_else(|| ApiError::bad_request("missing X-Caracal-Target-URL", &correlation_id))?;
    let target_url = parse_target_url(target_raw)
        .map_err(|e| ApiError::bad_request(e.to_string(), &correlation_id))?;

    let mandate_header = header_str(&headers, "x-caracal-mandate")
        .ok_or_else(|| ApiError::bad_request("missing X-Caracal-Mandate", &correlation_id))?;
    let mandate_id = resolve_mandate_id(mandate_header)
        .map_err(|_| ApiError::mandate_not_found(&correlation_id))?;

    let chain = state
        .mandate_store
        .chain_for(&mandate_id)
        .map_err(|_| ApiError::mandate_not_found(&correlation_id))?;

    let action = method.as_str().to_ascii_lowercase();
    let resource = target_url.as_str().to_string();
    let decision = decide(&chain, &state.trusted_keys, &action, &resource, now);

    let subject_id = chain.last().map(|m| m.content.subject_id.clone());

    if !decision.allowed {
        tracing::warn!(correlation_id = %correlation_id, reason = %decision.reason, "mandate denied");
        emit_decision(&state, subject_id.as_deref(), &action, &resource, &decision.reason, false, &correlation_id, now);
        return Err(ApiError::denied(decision.denial_kind, decision.reason, &correlation_id));
    }

    let subject_id = subject_id.unwrap_or_default();
    let (degraded, cache_age) = match enforce_policy(&state, &subject_id, &action, &resource, now, &correlation_id) {
        Ok(outcome) => outcome,
        Err(err) if err.code == "policy_not_found" || err.code == "scope_escalation" => {
            emit_decision(&state, Some(&subject_id), &action, &resource, &err.message, false, &correlation_id, now);
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    if degraded {
        tracing::warn!(correlation_id = %correlation_id, subject_id = %subject_id, cache_age, "serving request in degraded mode on a stale cached policy");
    }
    emit_decision(&state, Some(&subject_id), &action, &resource, &decision.reason, true, &correlation_id, now);

    if let Some(cost_header) = header_str(&headers, "x-caracal-estimated-cost") {
        if let Ok(cost) = cost_header.parse::<f64>() {
            emit_metering(&state, &subject_id, &mandate_id, cost, &correlation_id, now);
            state
                .policy_cache
                .record_spending(&subject_id, cost, now, std::time::Duration::from_secs(3600));
        }
    }

    let content_type = header_str(&headers, "content-type");
    let forwarded = state
        .forwarder
        .forward(method, &target_url, body, content_type)
        .await
        .map_err(|e| match e {
            ForwardError::Timeout => ApiError::upstream_timeout(&correlation_id),
            other => ApiError::new(StatusCode::BAD_GATEWAY, "forward_failed", other.to_string(), &correlation_id),
        })?;

    let mut response_headers = filter_response_headers(&forwarded.headers);
    response_headers.insert("x-caracal-decision", "allowed".parse().unwrap());
    response_headers.insert("x-caracal-correlation-id", correlation_id.parse().unwrap());
    if degraded {
        response_headers.insert("x-caracal-degraded-mode", "true".parse().unwrap());
        response_headers.insert("x-caracal-cache-age", cache_age.to_string().parse().unwrap());
    }

    let mut response = (forwarded.status, forwarded.body).into_response();
    for (name, value) in response_headers.iter() {
        response.headers_mut().insert(name, value.clone());
    }
    Ok(response)
}

async fn authenticate(state: &AppState, headers: &HeaderMap, correlation_id: &str) -> Result<String, ApiError> {
    let bearer = header_str(headers, "authorization").and_then(|v| v.strip_prefix("Bearer "));

    if let (Some(token), Some(validator)) = (bearer, state.token_validator.as_ref()) {
        let claims = validator
            .validate(token, &state.auth_config)
            .await
            .map_err(|e| ApiError::unauthenticated(e.to_string(), correlation_id))?;
        return Ok(claims.sub);
    }

    if state.auth_config.mode == crate::auth::AuthMode::Strict {
        return Err(ApiError::unauthenticated("missing or unresolvable bearer token", correlation_id));
    }

    header_str(headers, "x-caracal-principal-id")
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthenticated("no credential and no fallback principal id", correlation_id))
}

/// Loads the subject's current policy, using the cache when fresh and
/// falling back to a stale cache entry (degraded mode) when the policy
/// store is unreachable. Returns `(degraded, cache_age_seconds)`.
fn enforce_policy(
    state: &AppState,
    subject_id: &str,
    action: &str,
    resource: &str,
    now: DateTime<Utc>,
    correlation_id: &str,
) -> Result<(bool, i64), ApiError> {
    if let Some(cached) = state.policy_cache.get(subject_id) {
        if cached.is_fresh(now) {
            return check_permits(&cached, action, resource, correlation_id).map(|_| (false, 0));
        }
    }

    match state.policy_store.get_active(subject_id) {
        Ok(policy) => {
            let cached = state.policy_cache.put(subject_id, policy, now);
            check_permits(&cached, action, resource, correlation_id).map(|_| (false, 0))
        }
        Err(PolicyError::NoActivePolicy { .. }) => {
            Err(ApiError::new(StatusCode::FORBIDDEN, "policy_not_found", "no active policy for this principal", correlation_id))
        }
        Err(_dependency_failure) => match state.policy_cache.get(subject_id) {
            Some(stale) if stale.age_seconds(now) <= state.degraded_mode_max_age.as_secs() as i64 => {
                let age = stale.age_seconds(now);
                check_permits(&stale, action, resource, correlation_id).map(|_| (true, age))
            }
            _ => Err(ApiError::policy_service_unavailable(correlation_id)),
        },
    }
}

fn check_permits(cached: &CachedPolicy, action: &str, resource: &str, correlation_id: &str) -> Result<(), ApiError> {
    if cached.policy.permits(resource, action) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::FORBIDDEN, "scope_escalation", "policy no longer permits this request", correlation_id))
    }
}

fn emit_decision(
    state: &AppState,
    principal_id: Option<&str>,
    action: &str,
    resource: &str,
    reason: &str,
    allowed: bool,
    correlation_id: &str,
    now: DateTime<Utc>,
) {
    let payload = json!({
        "principal_id": principal_id,
        "action": action,
        "resource": resource,
        "allowed": allowed,
        "reason": reason,
        "correlation_id": correlation_id,
        "timestamp": now,
    });
    let key = principal_id.unwrap_or("unknown");
    let _ = state.event_bus.produce(Topic::AuthorityEvents, key, &payload, now);
}

fn emit_metering(state: &AppState, principal_id: &str, mandate_id: &str, cost: f64, correlation_id: &str, now: DateTime<Utc>) {
    let payload = json!({
        "principal_id": principal_id,
        "mandate_id": mandate_id,
        "cost": cost,
        "correlation_id": correlation_id,
        "timestamp": now,
    });
    let _ = state.event_bus.produce(Topic::MeteringEvents, principal_id, &payload, now);
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>().ok().and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// A mandate header is either a bare mandate id or a `.`-delimited wire
/// form; `decode_wire_form` already tolerates the latter without verifying
/// the signature, since verification happens against the stored mandate's
/// own signature via `decide`.
fn resolve_mandate_id(raw: &str) -> Result<String, ()> {
    if raw.matches('.').count() == 2 {
        decode_wire_form(raw).map(|(id, _)| id).map_err(|_| ())
    } else {
        Ok(raw.to_string())
    }
}
