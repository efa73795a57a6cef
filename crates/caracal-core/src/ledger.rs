//! Ledger writer and Merkle batcher.
//!
//! Every event the bus delivers becomes exactly one `ledger_events` row,
//! chained to its predecessor by `prev_hash` and numbered by a strictly
//! increasing `event_id`. Rows are append-only: there is no `update` or
//! `delete` in this module's public surface, matching the invariant that
//! the ledger is never rewritten. Leaves accumulate in memory until the
//! batcher closes a batch (by count or by wall-clock age, whichever comes
//! first) and signs the resulting Merkle root; a failed signature never
//! blocks a ledger append, it just leaves the batch open for the next
//! close attempt.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::merkle::{self, Hash};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger_events (
    event_id           INTEGER PRIMARY KEY,
    kind               TEXT NOT NULL,
    timestamp          TEXT NOT NULL,
    principal_id       TEXT,
    mandate_id         TEXT,
    decision           INTEGER,
    denial_reason      TEXT,
    requested_action   TEXT,
    requested_resource TEXT,
    payload_json       TEXT NOT NULL,
    correlation_id     TEXT,
    prev_hash          TEXT NOT NULL,
    leaf_hash          TEXT NOT NULL,
    batch_id           TEXT
);

CREATE TABLE IF NOT EXISTS merkle_batches (
    batch_id        TEXT PRIMARY KEY,
    first_event_id  INTEGER NOT NULL,
    last_event_id   INTEGER NOT NULL,
    leaf_count      INTEGER NOT NULL,
    root_hash       TEXT NOT NULL,
    signature       TEXT NOT NULL,
    signer_key_id   TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
"#;

const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000000000000000";

pub const DEFAULT_BATCH_SIZE: usize = 1024;
pub const DEFAULT_BATCH_INTERVAL_SECONDS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MandateIssued,
    MandateDelegated,
    MandateRevoked,
    AuthorityDecision,
    Metering,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            EventKind::MandateIssued => "mandate_issued",
            EventKind::MandateDelegated => "mandate_delegated",
            EventKind::MandateRevoked => "mandate_revoked",
            EventKind::AuthorityDecision => "authority_decision",
            EventKind::Metering => "metering",
        }
    }
}

/// A single row as it will be appended. `payload` carries whatever
/// kind-specific detail doesn't have its own column (metering amounts,
/// intent, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEvent {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub mandate_id: Option<String>,
    pub decision: Option<bool>,
    pub denial_reason: Option<String>,
    pub requested_action: Option<String>,
    pub requested_resource: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: i64,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub principal_id: Option<String>,
    pub mandate_id: Option<String>,
    pub decision: Option<bool>,
    pub denial_reason: Option<String>,
    pub requested_action: Option<String>,
    pub requested_resource: Option<String>,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub prev_hash: String,
}

#[derive(Debug, Clone)]
pub struct MerkleBatch {
    pub batch_id: String,
    pub first_event_id: i64,
    pub last_event_id: i64,
    pub leaf_count: u32,
    pub root_hash: String,
    pub signature: String,
    pub signer_key_id: String,
    pub created_at: DateTime<Utc>,
}

pub struct EventVerification {
    pub contained: bool,
    pub root_hash: String,
    pub signed_by_key_id: String,
    pub valid_signature: bool,
}

/// Filter accumulated by the audit surface before it hits SQL. Every field
/// is optional and narrows the result; an empty `LedgerQuery` returns the
/// most recent `limit` events across all principals.
#[derive(Debug, Clone, Default)]
pub struct LedgerQuery {
    pub principal_id: Option<String>,
    pub mandate_id: Option<String>,
    pub kind: Option<EventKind>,
    pub correlation_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl LedgerQuery {
    pub fn new() -> Self {
        Self { limit: 1000, ..Default::default() }
    }

    pub fn principal(mut self, principal_id: impl Into<String>) -> Self {
        self.principal_id = Some(principal_id.into());
        self
    }

    pub fn mandate(mut self, mandate_id: impl Into<String>) -> Self {
        self.mandate_id = Some(mandate_id.into());
        self
    }

    pub fn kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn between(mut self, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

pub struct Ledger {
    conn: Mutex<Connection>,
    pending: Mutex<Vec<(i64, Hash)>>,
    first_pending_at: Mutex<Option<DateTime<Utc>>>,
    batch_size: usize,
    batch_interval: Duration,
}

impl Ledger {
    pub fn open(path: &std::path::Path) -> Result<Self, CoreError> {
        Self::from_connection(Connection::open(path)?, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_INTERVAL_SECONDS)
    }

    pub fn memory() -> Result<Self, CoreError> {
        Self::from_connection(Connection::open_in_memory()?, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_INTERVAL_SECONDS)
    }

    pub fn from_connection(
        conn: Connection,
        batch_size: usize,
        batch_interval_seconds: i64,
    ) -> Result<Self, CoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            pending: Mutex::new(Vec::new()),
            first_pending_at: Mutex::new(None),
            batch_size,
            batch_interval: Duration::seconds(batch_interval_seconds),
        })
    }

    /// Append one event. Validates nothing about the event's semantics
    /// (schema validation happens in the consumer that builds `NewLedgerEvent`
    /// from the bus message); this layer only guarantees ordering, chaining,
    /// and that the leaf is queued for the next batch close.
    pub fn append(&self, event: NewLedgerEvent, now: DateTime<Utc>) -> Result<i64, CoreError> {
        let conn = self.conn.lock().unwrap();
        let (last_event_id, prev_hash): (Option<i64>, Option<String>) = conn
            .query_row(
                "SELECT event_id, leaf_hash FROM ledger_events ORDER BY event_id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .unzip();
        let event_id = last_event_id.unwrap_or(0) + 1;
        let prev_hash = prev_hash.unwrap_or_else(|| GENESIS_HASH.to_string());

        let canonical = serde_json::json!({
            "event_id": event_id,
            "kind": event.kind.as_str(),
            "timestamp": event.timestamp,
            "principal_id": event.principal_id,
            "mandate_id": event.mandate_id,
            "payload": event.payload,
            "prev_hash": prev_hash,
        });
        let canonical_bytes = serde_jcs::to_string(&canonical).unwrap().into_bytes();
        let leaf_hash = merkle::hash_leaf(&canonical_bytes);
        let leaf_hash_hex = hex::encode(leaf_hash);

        conn.execute(
            "INSERT INTO ledger_events
                (event_id, kind, timestamp, principal_id, mandate_id, decision, denial_reason,
                 requested_action, requested_resource, payload_json, correlation_id, prev_hash, leaf_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                event_id,
                event.kind.as_str(),
                event.timestamp.to_rfc3339(),
                event.principal_id,
                event.mandate_id,
                event.decision,
                event.denial_reason,
                event.requested_action,
                event.requested_resource,
                serde_json::to_string(&event.payload).unwrap(),
                event.correlation_id,
                prev_hash,
                leaf_hash_hex,
            ],
        )?;
        drop(conn);

        let mut pending = self.pending.lock().unwrap();
        pending.push((event_id, leaf_hash));
        let mut first_pending_at = self.first_pending_at.lock().unwrap();
        if first_pending_at.is_none() {
            *first_pending_at = Some(now);
        }

        Ok(event_id)
    }

    /// Close the current batch if the size or age threshold has been
    /// crossed. Returns `None` (not an error) when neither threshold has
    /// fired yet; a signing failure is surfaced to the caller so it can
    /// retry and raise a health alert, leaving the batch open.
    pub fn close_batch_if_needed(
        &self,
        signing_key: &SigningKey,
        signer_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MerkleBatch>, CoreError> {
        let should_close = {
            let pending = self.pending.lock().unwrap();
            let first_pending_at = self.first_pending_at.lock().unwrap();
            !pending.is_empty()
                && (pending.len() >= self.batch_size
                    || first_pending_at.map(|t| now - t >= self.batch_interval).unwrap_or(false))
        };
        if !should_close {
            return Ok(None);
        }
        self.close_batch(signing_key, signer_key_id, now)
    }

    /// Force a batch close regardless of thresholds (used by the admin
    /// `snapshot` operation so a snapshot's `last_included_event_id` always
    /// falls inside a signed batch).
    pub fn close_batch(
        &self,
        signing_key: &SigningKey,
        signer_key_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MerkleBatch>, CoreError> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            return Ok(None);
        }
        let leaves: Vec<Hash> = pending.iter().map(|(_, h)| *h).collect();
        let first_event_id = pending[0].0;
        let last_event_id = pending[pending.len() - 1].0;
        let leaf_count = pending.len() as u32;

        let root = merkle::merkle_root(&leaves);
        let root_hex = hex::encode(root);
        let batch_id = format!("batch:{first_event_id}-{last_event_id}");

        let signable = format!("{root_hex}:{first_event_id}:{last_event_id}");
        let signature: EcdsaSignature = signing_key.sign(signable.as_bytes());
        let signature_hex = hex::encode(signature.to_bytes());

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO merkle_batches
                (batch_id, first_event_id, last_event_id, leaf_count, root_hash, signature, signer_key_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                batch_id,
                first_event_id,
                last_event_id,
                leaf_count,
                root_hex,
                signature_hex,
                signer_key_id,
                now.to_rfc3339(),
            ],
        )?;
        conn.execute(
            "UPDATE ledger_events SET batch_id = ?1 WHERE event_id BETWEEN ?2 AND ?3",
            params![batch_id, first_event_id, last_event_id],
        )?;
        drop(conn);

        pending.clear();
        *self.first_pending_at.lock().unwrap() = None;

        Ok(Some(MerkleBatch {
            batch_id,
            first_event_id,
            last_event_id,
            leaf_count,
            root_hash: root_hex,
            signature: signature_hex,
            signer_key_id: signer_key_id.to_string(),
            created_at: now,
        }))
    }

    pub fn get(&self, event_id: i64) -> Result<LedgerEvent, CoreError> {
        let conn = self.conn.lock().unwrap();
        Self::row_to_event(&conn, event_id)?.ok_or(CoreError::EventNotFound { event_id })
    }

    /// Filtered, newest-first scan of the ledger for the audit surface.
    /// Filters accumulate as `AND` clauses the same way the legacy
    /// audit-log query built up its predicate list.
    pub fn query(&self, filter: &LedgerQuery) -> Result<Vec<LedgerEvent>, CoreError> {
        let mut sql = String::from(
            "SELECT event_id, kind, timestamp, principal_id, mandate_id, decision, denial_reason,
                    requested_action, requested_resource, payload_json, correlation_id, prev_hash
             FROM ledger_events WHERE 1 = 1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(principal_id) = &filter.principal_id {
            sql.push_str(" AND principal_id = ?");
            params.push(Box::new(principal_id.clone()));
        }
        if let Some(mandate_id) = &filter.mandate_id {
            sql.push_str(" AND mandate_id = ?");
            params.push(Box::new(mandate_id.clone()));
        }
        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            params.push(Box::new(kind.as_str()));
        }
        if let Some(correlation_id) = &filter.correlation_id {
            sql.push_str(" AND correlation_id = ?");
            params.push(Box::new(correlation_id.clone()));
        }
        if let Some(start_time) = filter.start_time {
            sql.push_str(" AND timestamp >= ?");
            params.push(Box::new(start_time.to_rfc3339()));
        }
        if let Some(end_time) = filter.end_time {
            sql.push_str(" AND timestamp <= ?");
            params.push(Box::new(end_time.to_rfc3339()));
        }
        sql.push_str(" ORDER BY event_id DESC LIMIT ?");
        params.push(Box::new(filter.limit as i64));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::row_from_columns)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(CoreError::from)
    }

    /// Reconstruct the batch's leaves from the ledger and verify `event_id`'s
    /// inclusion proof against the persisted, signed root.
    pub fn verify_event(
        &self,
        event_id: i64,
        verifying_key: &VerifyingKey,
    ) -> Result<EventVerification, CoreError> {
        let conn = self.conn.lock().unwrap();
        let batch_id: Option<String> = conn
            .query_row(
                "SELECT batch_id FROM ledger_events WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let Some(batch_id) = batch_id else {
            return Ok(EventVerification {
                contained: false,
                root_hash: String::new(),
                signed_by_key_id: String::new(),
                valid_signature: false,
            });
        };

        let (first_event_id, last_event_id, root_hash, signature_hex, signer_key_id): (
            i64,
            i64,
            String,
            String,
            String,
        ) = conn.query_row(
            "SELECT first_event_id, last_event_id, root_hash, signature, signer_key_id
             FROM merkle_batches WHERE batch_id = ?1",
            params![batch_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT event_id, leaf_hash FROM ledger_events
             WHERE event_id BETWEEN ?1 AND ?2 ORDER BY event_id ASC",
        )?;
        let rows: Vec<(i64, String)> = stmt
            .query_map(params![first_event_id, last_event_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let leaves: Vec<Hash> = rows
            .iter()
            .map(|(_, hex_hash)| {
                let bytes = hex::decode(hex_hash).unwrap();
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&bytes);
                hash
            })
            .collect();
        let index = rows.iter().position(|(id, _)| *id == event_id).unwrap();
        let proof = merkle::merkle_proof(&leaves, index);
        let contained = merkle::verify_proof(leaves[index], &proof, {
            let bytes = hex::decode(&root_hash).unwrap();
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes);
            hash
        });

        let signable = format!("{root_hash}:{first_event_id}:{last_event_id}");
        let signature_bytes = hex::decode(&signature_hex).unwrap();
        let valid_signature = EcdsaSignature::from_slice(&signature_bytes)
            .ok()
            .map(|sig| verifying_key.verify(signable.as_bytes(), &sig).is_ok())
            .unwrap_or(false);

        Ok(EventVerification {
            contained,
            root_hash,
            signed_by_key_id: signer_key_id,
            valid_signature,
        })
    }

    fn row_to_event(conn: &Connection, event_id: i64) -> Result<Option<LedgerEvent>, CoreError> {
        conn.query_row(
            "SELECT event_id, kind, timestamp, principal_id, mandate_id, decision, denial_reason,
                    requested_action, requested_resource, payload_json, correlation_id, prev_hash
             FROM ledger_events WHERE event_id = ?1",
            params![event_id],
            Self::row_from_columns,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_from_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEvent> {
        let timestamp: String = row.get(2)?;
        let payload_json: String = row.get(9)?;
        Ok(LedgerEvent {
            event_id: row.get(0)?,
            kind: row.get(1)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp).unwrap().with_timezone(&Utc),
            principal_id: row.get(3)?,
            mandate_id: row.get(4)?,
            decision: row.get(5)?,
            denial_reason: row.get(6)?,
            requested_action: row.get(7)?,
            requested_resource: row.get(8)?,
            payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
            correlation_id: row.get(10)?,
            prev_hash: row.get(11)?,
        })
    }
}
