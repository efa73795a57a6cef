//! Outbound decision forwarding.
//!
//! Follows a `build_downstream_headers` discipline: an outbound
//! request is built from an explicit allowlist, never by cloning the
//! inbound header set, so there is no code path where inbound auth material
//! can leak downstream. Every call carries the gateway's configured
//! deadline; a timeout is reported as its own error rather than bubbling up
//! as a generic network failure, since the router maps it to `504
//! upstream_timeout` while still having already emitted the decision event.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use url::Url;

use crate::auth::build_downstream_headers;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("downstream request did not complete before its deadline")]
    Timeout,
    #[error("downstream request failed: {0}")]
    Network(String),
    #[error("invalid target URL: {0}")]
    InvalidTarget(String),
}

pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ForwardError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    /// Forward `body` to `target` with `method`, allowlisted headers plus
    /// `content_type` when the inbound request carried one.
    pub async fn forward(
        &self,
        method: Method,
        target: &Url,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<ForwardedResponse, ForwardError> {
        let mut request = self
            .client
            .request(method, target.clone())
            .timeout(self.timeout)
            .body(body);

        for (name, value) in build_downstream_headers() {
            request = request.header(name, value);
        }
        if let Some(ct) = content_type {
            request = request.header("content-type", ct);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| ForwardError::Network(e.to_string()))?;

        Ok(ForwardedResponse { status, headers, body })
    }
}

pub fn parse_target_url(raw: &str) -> Result<Url, ForwardError> {
    Url::parse(raw).map_err(|e| ForwardError::InvalidTarget(e.to_string()))
}

/// Header names safe to copy verbatim from a downstream response back to
/// the caller. Everything else (set-cookie, hop-by-hop headers) is dropped.
pub fn filter_response_headers(headers: &HeaderMap) -> HeaderMap {
    const ALLOWED: &[&str] = &["content-type", "content-length", "cache-control"];
    let mut out = HeaderMap::new();
    for name in ALLOWED {
        if let Some(value) = headers.get(*name) {
            out.insert(*name, value.clone());
        }
    }
    out
}

pub fn header_value(s: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(s).ok()
}
