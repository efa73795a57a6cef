//! `caracal serve` - boot the gateway's HTTP surface and its background
//! consumer loops (one per event-bus topic, plus a batch-closer timer for
//! the Merkle ledger), the concurrency shape `caracal_core::event_bus`
//! expects callers to run.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use caracal_core::event_bus::Topic;
use caracal_core::ledger::{EventKind, NewLedgerEvent};
use caracal_core::{EventBus, Ledger, MandateStore};
use caracal_gateway::auth::AuthConfig;
use caracal_gateway::{build_app, AppState};
use caracal_policy::PolicyStore;
use p256::ecdsa::{SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use tracing::{error, info, warn};

use crate::cli::args::ServeArgs;
use crate::exit_codes;

const CONSUMER_GROUP: &str = "ledger-writer";
const POLL_BATCH: usize = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const BATCH_CLOSER_INTERVAL: Duration = Duration::from_secs(5);

pub fn run(args: ServeArgs) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {e}");
            return exit_codes::GENERAL_FAILURE;
        }
    };
    match runtime.block_on(run_serve(args)) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::DEPENDENCY_UNAVAILABLE
        }
    }
}

fn load_trusted_keys(raw: &[(String, std::path::PathBuf)]) -> Result<HashMap<String, VerifyingKey>> {
    raw.iter()
        .map(|(key_id, path)| {
            let pem = fs::read_to_string(path)
                .with_context(|| format!("failed to read trusted key: {}", path.display()))?;
            let key = VerifyingKey::from_public_key_pem(&pem)
                .with_context(|| format!("failed to parse trusted key: {}", path.display()))?;
            Ok((key_id.clone(), key))
        })
        .collect()
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let mandate_store = MandateStore::open(&args.mandate_db)
        .with_context(|| format!("failed to open mandate store: {}", args.mandate_db.display()))?;
    let policy_store = PolicyStore::open(&args.policy_db)
        .with_context(|| format!("failed to open policy store: {}", args.policy_db.display()))?;
    let event_bus = EventBus::open(&args.bus_db)
        .with_context(|| format!("failed to open event bus: {}", args.bus_db.display()))?;
    let ledger = Arc::new(
        Ledger::open(&args.ledger_db)
            .with_context(|| format!("failed to open ledger: {}", args.ledger_db.display()))?,
    );

    let trusted_keys = load_trusted_keys(&args.trusted_keys)?;

    let signing_pem = fs::read_to_string(&args.signing_key)
        .with_context(|| format!("failed to read signing key: {}", args.signing_key.display()))?;
    let signing_key = Arc::new(
        SigningKey::from_pkcs8_pem(&signing_pem)
            .with_context(|| format!("failed to parse signing key: {}", args.signing_key.display()))?,
    );

    let state = Arc::new(
        AppState::new(
            mandate_store,
            policy_store,
            event_bus.clone(),
            trusted_keys,
            AuthConfig::default(),
            Duration::from_secs(args.forward_timeout_seconds),
        )
        .context("failed to build gateway state")?,
    );

    spawn_ledger_consumer(event_bus.clone(), ledger.clone(), Topic::AuthorityEvents, EventKind::AuthorityDecision);
    spawn_ledger_consumer(event_bus.clone(), ledger.clone(), Topic::MeteringEvents, EventKind::Metering);
    spawn_batch_closer(ledger, signing_key, args.signer_key_id.clone());

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "caracal gateway listening");

    axum::serve(listener, app).await.context("gateway server exited")
}

fn ledger_event_from(kind: EventKind, event: &caracal_core::event_bus::ConsumedEvent) -> NewLedgerEvent {
    let v = &event.value;
    let get_str = |field: &str| v.get(field).and_then(|x| x.as_str()).map(str::to_string);
    let timestamp = v
        .get("timestamp")
        .and_then(|x| x.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now);

    NewLedgerEvent {
        kind,
        timestamp,
        principal_id: get_str("principal_id"),
        mandate_id: get_str("mandate_id"),
        decision: v.get("allowed").and_then(|x| x.as_bool()),
        denial_reason: get_str("reason"),
        requested_action: get_str("action"),
        requested_resource: get_str("resource"),
        payload: v.clone(),
        correlation_id: get_str("correlation_id"),
    }
}

fn spawn_ledger_consumer(bus: EventBus, ledger: Arc<Ledger>, topic: Topic, kind: EventKind) {
    tokio::spawn(async move {
        loop {
            match bus.poll(CONSUMER_GROUP, topic, POLL_BATCH) {
                Ok(batch) if !batch.is_empty() => {
                    for event in &batch {
                        let ledger_event = ledger_event_from(kind, event);
                        let now = chrono::Utc::now();
                        if let Err(e) = ledger.append(ledger_event, now) {
                            error!(topic = topic.as_str(), offset = event.offset, error = %e, "failed to append ledger event");
                            break;
                        }
                        if let Err(e) = bus.commit_offset(CONSUMER_GROUP, topic, event.offset) {
                            error!(topic = topic.as_str(), offset = event.offset, error = %e, "failed to commit offset");
                            break;
                        }
                    }
                }
                Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                    warn!(topic = topic.as_str(), error = %e, "poll failed, retrying");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    });
}

fn spawn_batch_closer(ledger: Arc<Ledger>, signing_key: Arc<SigningKey>, signer_key_id: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(BATCH_CLOSER_INTERVAL).await;
            let now = chrono::Utc::now();
            match ledger.close_batch_if_needed(&signing_key, &signer_key_id, now) {
                Ok(Some(batch)) => info!(batch_id = %batch.batch_id, leaf_count = batch.leaf_count, "closed ledger batch"),
                Ok(None) => {}
                Err(e) => error!(error = %e, "failed to close ledger batch"),
            }
        }
    });
}
