//! Execution mandate storage.
//!
//! An `Arc<Mutex<Connection>>`-backed SQLite store, opened via `open`/
//! `memory`/`from_connection`, built around the data model's actual
//! `execution_mandates` table: a signed,
//! scoped, time-bounded capability that may chain to a parent via
//! `parent_mandate_id`. The store owns mandate rows exclusively; it does not
//! decide anything (that's the evaluator) and does not enforce policy
//! (that's the mandate manager, built on top of this store).
//!
//! An index on `parent_mandate_id` makes both chain assembly (walk up to
//! the root for the evaluator) and cascade revocation (walk down to every
//! descendant) index scans rather than table scans.

use std::path::Path;
use std::sync::{Arc, Mutex};

use caracal_mandate::{Context, Mandate, MandateContent, Scope, Signature, Validity};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS execution_mandates (
    mandate_id            TEXT PRIMARY KEY,
    issuer_id             TEXT NOT NULL,
    subject_id            TEXT NOT NULL,
    resource_scope        TEXT NOT NULL,
    action_scope          TEXT NOT NULL,
    valid_from             TEXT NOT NULL,
    valid_until            TEXT NOT NULL,
    parent_mandate_id      TEXT REFERENCES execution_mandates(mandate_id),
    delegation_depth       INTEGER NOT NULL,
    intent                 TEXT,
    context_app_id         TEXT NOT NULL,
    context_issuer_domain  TEXT NOT NULL,
    signature_json         TEXT,
    revoked                INTEGER NOT NULL DEFAULT 0,
    revoked_at             TEXT,
    revoked_by             TEXT,
    revocation_reason      TEXT
);

CREATE INDEX IF NOT EXISTS idx_mandates_parent ON execution_mandates(parent_mandate_id);
CREATE INDEX IF NOT EXISTS idx_mandates_subject ON execution_mandates(subject_id);
CREATE INDEX IF NOT EXISTS idx_mandates_issuer ON execution_mandates(issuer_id);
"#;

#[derive(Clone)]
pub struct MandateStore {
    conn: Arc<Mutex<Connection>>,
}

impl MandateStore {
    pub fn open(path: &Path) -> Result<Self, CoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn memory() -> Result<Self, CoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a freshly issued or delegated mandate. Mandates are immutable
    /// apart from revocation metadata, so this is insert-only; callers never
    /// update a row's scope/validity/signature after the fact.
    pub fn insert(&self, mandate: &Mandate) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        Self::insert_row(&conn, mandate)
    }

    pub fn get(&self, mandate_id: &str) -> Result<Mandate, CoreError> {
        let conn = self.conn.lock().unwrap();
        Self::get_row(&conn, mandate_id)?.ok_or_else(|| CoreError::MandateNotFound {
            mandate_id: mandate_id.to_string(),
        })
    }

    /// Every mandate that is not revoked and has not expired as of `now`,
    /// for the snapshot builder.
    pub fn list_live(&self, now: DateTime<Utc>) -> Result<Vec<Mandate>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT mandate_id, issuer_id, subject_id, resource_scope, action_scope,
                    valid_from, valid_until, parent_mandate_id, delegation_depth, intent,
                    context_app_id, context_issuer_domain, signature_json,
                    revoked, revoked_at, revoked_by, revocation_reason
             FROM execution_mandates WHERE revoked = 0 AND valid_until >= ?1",
        )?;
        let rows = stmt
            .query_map(params![now.to_rfc3339()], Self::row_to_mandate)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Mandates whose `parent_mandate_id` is exactly `mandate_id` (one level
    /// down). The mandate manager's cascade walk calls this repeatedly
    /// breadth-first rather than relying on a recursive SQL query, so the
    /// traversal order (and therefore event emission order) is explicit.
    pub fn children_of(&self, mandate_id: &str) -> Result<Vec<Mandate>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT mandate_id, issuer_id, subject_id, resource_scope, action_scope,
                    valid_from, valid_until, parent_mandate_id, delegation_depth, intent,
                    context_app_id, context_issuer_domain, signature_json,
                    revoked, revoked_at, revoked_by, revocation_reason
             FROM execution_mandates WHERE parent_mandate_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![mandate_id], Self::row_to_mandate)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomically sets the revocation fields. Idempotent: revoking an
    /// already-revoked mandate is a no-op and returns `Ok(false)`.
    pub fn revoke(
        &self,
        mandate_id: &str,
        revoked_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mandate = Self::get_row(&conn, mandate_id)?.ok_or_else(|| CoreError::MandateNotFound {
            mandate_id: mandate_id.to_string(),
        })?;
        if mandate.revoked {
            return Ok(false);
        }
        conn.execute(
            "UPDATE execution_mandates SET revoked = 1, revoked_at = ?2, revoked_by = ?3,
                    revocation_reason = ?4
             WHERE mandate_id = ?1",
            params![mandate_id, now.to_rfc3339(), revoked_by, reason],
        )?;
        Ok(true)
    }

    /// Assembles the root-first, leaf-last chain the evaluator expects,
    /// following `parent_mandate_id` pointers up to a root mandate. Returns
    /// `MandateNotFound` if any link in the chain is dangling.
    pub fn chain_for(&self, mandate_id: &str) -> Result<Vec<Mandate>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let mut chain = Vec::new();
        let mut current = mandate_id.to_string();
        loop {
            let mandate = Self::get_row(&conn, &current)?.ok_or_else(|| CoreError::MandateNotFound {
                mandate_id: current.clone(),
            })?;
            let parent = mandate.content.parent_mandate_id.clone();
            chain.push(mandate);
            match parent {
                Some(parent_id) => current = parent_id,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    fn insert_row(conn: &Connection, mandate: &Mandate) -> Result<(), CoreError> {
        conn.execute(
            "INSERT INTO execution_mandates
                (mandate_id, issuer_id, subject_id, resource_scope, action_scope,
                 valid_from, valid_until, parent_mandate_id, delegation_depth, intent,
                 context_app_id, context_issuer_domain, signature_json,
                 revoked, revoked_at, revoked_by, revocation_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                mandate.mandate_id,
                mandate.content.issuer_id,
                mandate.content.subject_id,
                serde_json::to_string(&mandate.content.scope.resource_scope).unwrap(),
                serde_json::to_string(&mandate.content.scope.action_scope).unwrap(),
                mandate.content.validity.valid_from.to_rfc3339(),
                mandate.content.validity.valid_until.to_rfc3339(),
                mandate.content.parent_mandate_id,
                mandate.content.delegation_depth,
                mandate
                    .content
                    .intent
                    .as_ref()
                    .map(|i| serde_json::to_string(i).unwrap()),
                mandate.content.context.app_id,
                mandate.content.context.issuer_domain,
                mandate
                    .signature
                    .as_ref()
                    .map(|s| serde_json::to_string(s).unwrap()),
                mandate.revoked,
                mandate.revoked_at.map(|t| t.to_rfc3339()),
                mandate.revoked_by,
                mandate.revocation_reason,
            ],
        )?;
        Ok(())
    }

    fn get_row(conn: &Connection, mandate_id: &str) -> Result<Option<Mandate>, CoreError> {
        conn.query_row(
            "SELECT mandate_id, issuer_id, subject_id, resource_scope, action_scope,
                    valid_from, valid_until, parent_mandate_id, delegation_depth, intent,
                    context_app_id, context_issuer_domain, signature_json,
                    revoked, revoked_at, revoked_by, revocation_reason
             FROM execution_mandates WHERE mandate_id = ?1",
            params![mandate_id],
            Self::row_to_mandate,
        )
        .optional()
        .map_err(CoreError::from)
    }

    fn row_to_mandate(row: &rusqlite::Row<'_>) -> rusqlite::Result<Mandate> {
        let resource_scope: String = row.get(3)?;
        let action_scope: String = row.get(4)?;
        let valid_from: String = row.get(5)?;
        let valid_until: String = row.get(6)?;
        let intent: Option<String> = row.get(9)?;
        let signature_json: Option<String> = row.get(12)?;
        let revoked_at: Option<String> = row.get(14)?;

        let content = MandateContent {
            issuer_id: row.get(1)?,
            subject_id: row.get(2)?,
            scope: Scope::new(
                serde_json::from_str(&resource_scope).unwrap_or_default(),
                serde_json::from_str(&action_scope).unwrap_or_default(),
            ),
            validity: Validity::new(
                DateTime::parse_from_rfc3339(&valid_from).unwrap().with_timezone(&Utc),
                DateTime::parse_from_rfc3339(&valid_until).unwrap().with_timezone(&Utc),
            ),
            parent_mandate_id: row.get(7)?,
            delegation_depth: row.get(8)?,
            intent: intent.map(|i| serde_json::from_str(&i).unwrap()),
            context: Context::new(row.get::<_, String>(10)?, row.get::<_, String>(11)?),
        };

        Ok(Mandate {
            mandate_id: row.get(0)?,
            content,
            signature: signature_json.map(|s| serde_json::from_str::<Signature>(&s).unwrap()),
            revoked: row.get::<_, i64>(13)? != 0,
            revoked_at: revoked_at.map(|t| DateTime::parse_from_rfc3339(&t).unwrap().with_timezone(&Utc)),
            revoked_by: row.get(15)?,
            revocation_reason: row.get(16)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caracal_mandate::sign_mandate;
    use chrono::{Duration, TimeZone};
    use p256::ecdsa::SigningKey;
    use rand_core::OsRng;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
    }

    fn content(parent: Option<String>, depth: u32) -> MandateContent {
        MandateContent {
            issuer_id: "p-issuer".into(),
            subject_id: "p-subject".into(),
            scope: Scope::new(vec!["api:openai:*".into()], vec!["api_call".into()]),
            validity: Validity::new(now(), now() + Duration::hours(1)),
            parent_mandate_id: parent,
            delegation_depth: depth,
            intent: None,
            context: Context::new("org/app", "caracal"),
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = MandateStore::memory().unwrap();
        let key = SigningKey::random(&mut OsRng);
        let mandate = sign_mandate(&content(None, 0), &key).unwrap();
        store.insert(&mandate).unwrap();

        let fetched = store.get(&mandate.mandate_id).unwrap();
        assert_eq!(fetched.mandate_id, mandate.mandate_id);
        assert!(fetched.is_signed());
    }

    #[test]
    fn unknown_mandate_not_found() {
        let store = MandateStore::memory().unwrap();
        assert!(matches!(
            store.get("does-not-exist"),
            Err(CoreError::MandateNotFound { .. })
        ));
    }

    #[test]
    fn revoke_is_idempotent() {
        let store = MandateStore::memory().unwrap();
        let key = SigningKey::random(&mut OsRng);
        let mandate = sign_mandate(&content(None, 0), &key).unwrap();
        store.insert(&mandate).unwrap();

        let first = store.revoke(&mandate.mandate_id, "admin", "compromised", now()).unwrap();
        let second = store.revoke(&mandate.mandate_id, "admin", "compromised again", now()).unwrap();
        assert!(first);
        assert!(!second);

        let fetched = store.get(&mandate.mandate_id).unwrap();
        assert!(fetched.revoked);
        assert_eq!(fetched.revocation_reason.as_deref(), Some("compromised"));
    }

    #[test]
    fn children_of_finds_direct_descendants() {
        let store = MandateStore::memory().unwrap();
        let key = SigningKey::random(&mut OsRng);
        let root = sign_mandate(&content(None, 0), &key).unwrap();
        store.insert(&root).unwrap();
        let child = sign_mandate(&content(Some(root.mandate_id.clone()), 1), &key).unwrap();
        store.insert(&child).unwrap();

        let children = store.children_of(&root.mandate_id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].mandate_id, child.mandate_id);
    }

    #[test]
    fn chain_for_assembles_root_first_leaf_last() {
        let store = MandateStore::memory().unwrap();
        let key = SigningKey::random(&mut OsRng);
        let root = sign_mandate(&content(None, 0), &key).unwrap();
        store.insert(&root).unwrap();
        let child = sign_mandate(&content(Some(root.mandate_id.clone()), 1), &key).unwrap();
        store.insert(&child).unwrap();

        let chain = store.chain_for(&child.mandate_id).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].mandate_id, root.mandate_id);
        assert_eq!(chain[1].mandate_id, child.mandate_id);
    }

    #[test]
    fn chain_for_a_root_mandate_is_length_one() {
        let store = MandateStore::memory().unwrap();
        let key = SigningKey::random(&mut OsRng);
        let root = sign_mandate(&content(None, 0), &key).unwrap();
        store.insert(&root).unwrap();

        let chain = store.chain_for(&root.mandate_id).unwrap();
        assert_eq!(chain.len(), 1);
    }
}
