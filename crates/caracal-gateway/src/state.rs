//! Gateway application state.
//!
//! One `AppState`, shared behind an `Arc` across every handler, the same
//! shape the sibling `abp-daemon` example uses for its own `AppState`:
//! everything a handler needs lives in one struct instead of being threaded
//! through extractors individually.

use std::collections::HashMap;
use std::time::Duration;

use caracal_core::{EventBus, MandateStore};
use caracal_policy::PolicyStore;
use p256::ecdsa::VerifyingKey;

use crate::auth::{AuthConfig, JwksProvider, TokenValidator};
use crate::forward::{ForwardError, Forwarder};
use crate::policy_cache::{PolicyCache, DEFAULT_MAX_ENTRIES, DEFAULT_TTL_SECONDS};
use crate::replay_guard::{ReplayGuard, DEFAULT_REPLAY_WINDOW_SECONDS};

pub struct AppState {
    pub mandate_store: MandateStore,
    pub policy_store: PolicyStore,
    pub event_bus: EventBus,
    pub trusted_keys: HashMap<String, VerifyingKey>,
    pub policy_cache: PolicyCache,
    pub replay_guard: ReplayGuard,
    pub forwarder: Forwarder,
    pub auth_config: AuthConfig,
    pub token_validator: Option<TokenValidator>,
    pub degraded_mode_max_age: Duration,
}

impl AppState {
    pub fn new(
        mandate_store: MandateStore,
        policy_store: PolicyStore,
        event_bus: EventBus,
        trusted_keys: HashMap<String, VerifyingKey>,
        auth_config: AuthConfig,
        forward_timeout: Duration,
    ) -> Result<Self, ForwardError> {
        let token_validator = auth_config
            .jwks_uri
            .clone()
            .and_then(|uri| JwksProvider::new(uri).ok())
            .map(|jwks| TokenValidator::new(Some(jwks)));

        Ok(Self {
            mandate_store,
            policy_store,
            event_bus,
            trusted_keys,
            policy_cache: PolicyCache::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_ENTRIES),
            replay_guard: ReplayGuard::new(DEFAULT_REPLAY_WINDOW_SECONDS),
            forwarder: Forwarder::new(forward_timeout)?,
            auth_config,
            token_validator,
            degraded_mode_max_age: Duration::from_secs(15 * 60),
        })
    }
}
