//! Authority policy storage: current state plus immutable version history.
//!
//! At most one policy is `active` per principal at a time. A policy's
//! `policy_id` is stable for its whole lifetime — `create` mints it once,
//! `modify`/`deactivate` update the same row in place and each writes an
//! immutable `policy_versions` row capturing the before/after snapshot, who
//! made the change, and why. Versions are never mutated or deleted.

use crate::error::PolicyError;
use crate::schema::POLICY_SCHEMA;
use caracal_mandate::glob_matches;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityPolicy {
    pub policy_id: String,
    pub principal_id: String,
    pub allowed_resource_patterns: Vec<String>,
    pub allowed_actions: Vec<String>,
    pub max_validity_seconds: i64,
    pub allow_delegation: bool,
    pub max_delegation_depth: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub version_number: u32,
}

impl AuthorityPolicy {
    /// Whether a requested resource/action pair falls inside this policy's
    /// allowed patterns. Both lists must contain at least one matching
    /// glob — an empty allow-list matches nothing.
    pub fn permits(&self, resource: &str, action: &str) -> bool {
        self.allowed_resource_patterns
            .iter()
            .any(|pattern| glob_matches(pattern, resource).unwrap_or(false))
            && self
                .allowed_actions
                .iter()
                .any(|pattern| glob_matches(pattern, action).unwrap_or(false))
    }
}

/// The mutable half of a policy: everything `modify` is allowed to change.
#[derive(Debug, Clone)]
pub struct PolicySpec {
    pub allowed_resource_patterns: Vec<String>,
    pub allowed_actions: Vec<String>,
    pub max_validity_seconds: i64,
    pub allow_delegation: bool,
    pub max_delegation_depth: u32,
}

impl PolicySpec {
    fn validate(&self) -> Result<(), PolicyError> {
        if self.allowed_resource_patterns.is_empty() || self.allowed_actions.is_empty() {
            return Err(PolicyError::InvalidPolicy {
                reason: "allowed_resource_patterns and allowed_actions must be non-empty".into(),
            });
        }
        Ok(())
    }
}

/// An immutable row describing one policy transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub version_id: String,
    pub policy_id: String,
    pub principal_id: String,
    pub change_type: PolicyChangeKind,
    pub before: Option<AuthorityPolicy>,
    pub after: AuthorityPolicy,
    pub changed_by: String,
    pub change_reason: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChangeKind {
    Created,
    Modified,
    Deactivated,
}

impl PolicyChangeKind {
    fn as_str(self) -> &'static str {
        match self {
            PolicyChangeKind::Created => "created",
            PolicyChangeKind::Modified => "modified",
            PolicyChangeKind::Deactivated => "deactivated",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "created" => PolicyChangeKind::Created,
            "deactivated" => PolicyChangeKind::Deactivated,
            _ => PolicyChangeKind::Modified,
        }
    }
}

/// Field-by-field diff between two policy versions, for audit display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDiff {
    pub changed_fields: Vec<String>,
}

impl PolicyDiff {
    pub fn between(before: &AuthorityPolicy, after: &AuthorityPolicy) -> Self {
        let mut changed_fields = Vec::new();
        if before.allowed_resource_patterns != after.allowed_resource_patterns {
            changed_fields.push("allowed_resource_patterns".to_string());
        }
        if before.allowed_actions != after.allowed_actions {
            changed_fields.push("allowed_actions".to_string());
        }
        if before.max_validity_seconds != after.max_validity_seconds {
            changed_fields.push("max_validity_seconds".to_string());
        }
        if before.allow_delegation != after.allow_delegation {
            changed_fields.push("allow_delegation".to_string());
        }
        if before.max_delegation_depth != after.max_delegation_depth {
            changed_fields.push("max_delegation_depth".to_string());
        }
        if before.active != after.active {
            changed_fields.push("active".to_string());
        }
        Self { changed_fields }
    }
}

#[derive(Clone)]
pub struct PolicyStore {
    conn: Arc<Mutex<Connection>>,
}

impl PolicyStore {
    pub fn open(path: &Path) -> Result<Self, PolicyError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn memory() -> Result<Self, PolicyError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, PolicyError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(POLICY_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Atomically writes a brand-new policy (version 1) plus its initial
    /// `created` version row, deactivating any prior active policy for the
    /// same principal first so the single-active-policy invariant holds.
    pub fn create(
        &self,
        principal_id: &str,
        spec: PolicySpec,
        created_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorityPolicy, PolicyError> {
        spec.validate()?;
        let mut conn = self.conn.lock().unwrap();
        let txn = conn.transaction()?;

        if let Some(prev) = Self::get_active_row(&txn, principal_id)? {
            Self::deactivate_row(&txn, prev, created_by, "superseded by new policy", now)?;
        }

        let policy = AuthorityPolicy {
            policy_id: uuid::Uuid::new_v4().to_string(),
            principal_id: principal_id.to_string(),
            allowed_resource_patterns: spec.allowed_resource_patterns,
            allowed_actions: spec.allowed_actions,
            max_validity_seconds: spec.max_validity_seconds,
            allow_delegation: spec.allow_delegation,
            max_delegation_depth: spec.max_delegation_depth,
            active: true,
            created_at: now,
            created_by: created_by.to_string(),
            version_number: 1,
        };
        Self::insert_row(&txn, &policy)?;
        Self::insert_version(
            &txn,
            PolicyChangeKind::Created,
            None,
            &policy,
            created_by,
            reason,
            now,
        )?;

        txn.commit()?;
        Ok(policy)
    }

    /// Writes a new version of an existing policy in place: same
    /// `policy_id`, `version_number + 1`, updated spec fields.
    pub fn modify(
        &self,
        policy_id: &str,
        spec: PolicySpec,
        changed_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorityPolicy, PolicyError> {
        spec.validate()?;
        let mut conn = self.conn.lock().unwrap();
        let txn = conn.transaction()?;

        let before = Self::get_row(&txn, policy_id)?.ok_or_else(|| PolicyError::PolicyNotFound {
            policy_id: policy_id.to_string(),
        })?;

        let after = AuthorityPolicy {
            allowed_resource_patterns: spec.allowed_resource_patterns,
            allowed_actions: spec.allowed_actions,
            max_validity_seconds: spec.max_validity_seconds,
            allow_delegation: spec.allow_delegation,
            max_delegation_depth: spec.max_delegation_depth,
            version_number: before.version_number + 1,
            ..before.clone()
        };
        Self::update_row(&txn, &after)?;
        Self::insert_version(
            &txn,
            PolicyChangeKind::Modified,
            Some(&before),
            &after,
            changed_by,
            reason,
            now,
        )?;

        txn.commit()?;
        Ok(after)
    }

    pub fn deactivate(
        &self,
        policy_id: &str,
        changed_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorityPolicy, PolicyError> {
        let mut conn = self.conn.lock().unwrap();
        let txn = conn.transaction()?;

        let before = Self::get_row(&txn, policy_id)?.ok_or_else(|| PolicyError::PolicyNotFound {
            policy_id: policy_id.to_string(),
        })?;
        let after = Self::deactivate_row(&txn, before, changed_by, reason, now)?;

        txn.commit()?;
        Ok(after)
    }

    pub fn get(&self, policy_id: &str) -> Result<AuthorityPolicy, PolicyError> {
        let conn = self.conn.lock().unwrap();
        Self::get_row(&conn, policy_id)?.ok_or_else(|| PolicyError::PolicyNotFound {
            policy_id: policy_id.to_string(),
        })
    }

    pub fn get_active(&self, principal_id: &str) -> Result<AuthorityPolicy, PolicyError> {
        let conn = self.conn.lock().unwrap();
        Self::get_active_row(&conn, principal_id)?.ok_or_else(|| PolicyError::NoActivePolicy {
            principal_id: principal_id.to_string(),
        })
    }

    /// All currently-active policies across every principal, for the
    /// snapshot builder.
    pub fn list_active(&self) -> Result<Vec<AuthorityPolicy>, PolicyError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT policy_id, principal_id, allowed_resource_patterns, allowed_actions,
                    max_validity_seconds, allow_delegation, max_delegation_depth, active,
                    created_at, created_by, version_number
             FROM authority_policies WHERE active = 1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_policy)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn history(&self, policy_id: &str) -> Result<Vec<PolicyVersion>, PolicyError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT version_id, policy_id, principal_id, change_type, before_json, after_json,
                    changed_by, change_reason, changed_at
             FROM policy_versions WHERE policy_id = ?1 ORDER BY changed_at ASC",
        )?;
        let rows = stmt
            .query_map(params![policy_id], Self::row_to_version)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The version active at time `t`: the most recent version whose
    /// `changed_at <= t`.
    pub fn at_time(
        &self,
        policy_id: &str,
        t: DateTime<Utc>,
    ) -> Result<Option<AuthorityPolicy>, PolicyError> {
        let versions = self.history(policy_id)?;
        Ok(versions
            .into_iter()
            .filter(|v| v.changed_at <= t)
            .last()
            .map(|v| v.after))
    }

    fn deactivate_row(
        conn: &Connection,
        before: AuthorityPolicy,
        changed_by: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorityPolicy, PolicyError> {
        let after = AuthorityPolicy {
            active: false,
            version_number: before.version_number + 1,
            ..before.clone()
        };
        Self::update_row(conn, &after)?;
        Self::insert_version(
            conn,
            PolicyChangeKind::Deactivated,
            Some(&before),
            &after,
            changed_by,
            reason,
            now,
        )?;
        Ok(after)
    }

    fn get_row(conn: &Connection, policy_id: &str) -> Result<Option<AuthorityPolicy>, PolicyError> {
        conn.query_row(
            "SELECT policy_id, principal_id, allowed_resource_patterns, allowed_actions,
                    max_validity_seconds, allow_delegation, max_delegation_depth, active,
                    created_at, created_by, version_number
             FROM authority_policies WHERE policy_id = ?1",
            params![policy_id],
            Self::row_to_policy,
        )
        .optional()
        .map_err(PolicyError::from)
    }

    fn get_active_row(
        conn: &Connection,
        principal_id: &str,
    ) -> Result<Option<AuthorityPolicy>, PolicyError> {
        conn.query_row(
            "SELECT policy_id, principal_id, allowed_resource_patterns, allowed_actions,
                    max_validity_seconds, allow_delegation, max_delegation_depth, active,
                    created_at, created_by, version_number
             FROM authority_policies WHERE principal_id = ?1 AND active = 1",
            params![principal_id],
            Self::row_to_policy,
        )
        .optional()
        .map_err(PolicyError::from)
    }

    fn insert_row(conn: &Connection, policy: &AuthorityPolicy) -> Result<(), PolicyError> {
        conn.execute(
            "INSERT INTO authority_policies
                (policy_id, principal_id, allowed_resource_patterns, allowed_actions,
                 max_validity_seconds, allow_delegation, max_delegation_depth, active,
                 created_at, created_by, version_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                policy.policy_id,
                policy.principal_id,
                serde_json::to_string(&policy.allowed_resource_patterns).unwrap(),
                serde_json::to_string(&policy.allowed_actions).unwrap(),
                policy.max_validity_seconds,
                policy.allow_delegation,
                policy.max_delegation_depth,
                policy.active,
                policy.created_at.to_rfc3339(),
                policy.created_by,
                policy.version_number,
            ],
        )?;
        Ok(())
    }

    fn update_row(conn: &Connection, policy: &AuthorityPolicy) -> Result<(), PolicyError> {
        conn.execute(
            "UPDATE authority_policies SET
                allowed_resource_patterns = ?2, allowed_actions = ?3,
                max_validity_seconds = ?4, allow_delegation = ?5,
                max_delegation_depth = ?6, active = ?7, version_number = ?8
             WHERE policy_id = ?1",
            params![
                policy.policy_id,
                serde_json::to_string(&policy.allowed_resource_patterns).unwrap(),
                serde_json::to_string(&policy.allowed_actions).unwrap(),
                policy.max_validity_seconds,
                policy.allow_delegation,
                policy.max_delegation_depth,
                policy.active,
                policy.version_number,
            ],
        )?;
        Ok(())
    }

    fn insert_version(
        conn: &Connection,
        change_type: PolicyChangeKind,
        before: Option<&AuthorityPolicy>,
        after: &AuthorityPolicy,
        changed_by: &str,
        change_reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        conn.execute(
            "INSERT INTO policy_versions
                (version_id, policy_id, principal_id, change_type, before_json, after_json,
                 changed_by, change_reason, changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                uuid::Uuid::new_v4().to_string(),
                after.policy_id,
                after.principal_id,
                change_type.as_str(),
                before.map(|b| serde_json::to_string(b).unwrap()),
                serde_json::to_string(after).unwrap(),
                changed_by,
                change_reason,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuthorityPolicy> {
        let patterns: String = row.get(2)?;
        let actions: String = row.get(3)?;
        let created_at: String = row.get(8)?;
        Ok(AuthorityPolicy {
            policy_id: row.get(0)?,
            principal_id: row.get(1)?,
            allowed_resource_patterns: serde_json::from_str(&patterns).unwrap_or_default(),
            allowed_actions: serde_json::from_str(&actions).unwrap_or_default(),
            max_validity_seconds: row.get(4)?,
            allow_delegation: row.get::<_, i64>(5)? != 0,
            max_delegation_depth: row.get::<_, i64>(6)? as u32,
            active: row.get::<_, i64>(7)? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .unwrap()
                .with_timezone(&Utc),
            created_by: row.get(9)?,
            version_number: row.get::<_, i64>(10)? as u32,
        })
    }

    fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<PolicyVersion> {
        let change_type: String = row.get(3)?;
        let before_json: Option<String> = row.get(4)?;
        let after_json: String = row.get(5)?;
        let changed_at: String = row.get(8)?;
        Ok(PolicyVersion {
            version_id: row.get(0)?,
            policy_id: row.get(1)?,
            principal_id: row.get(2)?,
            change_type: PolicyChangeKind::parse(&change_type),
            before: before_json.map(|j| serde_json::from_str(&j).unwrap()),
            after: serde_json::from_str(&after_json).unwrap(),
            changed_by: row.get(6)?,
            change_reason: row.get(7)?,
            changed_at: DateTime::parse_from_rfc3339(&changed_at)
                .unwrap()
                .with_timezone(&Utc),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 11, 0, 0).unwrap()
    }

    fn spec() -> PolicySpec {
        PolicySpec {
            allowed_resource_patterns: vec!["api:openai:*".to_string()],
            allowed_actions: vec!["api_call".to_string()],
            max_validity_seconds: 3600,
            allow_delegation: true,
            max_delegation_depth: 3,
        }
    }

    #[test]
    fn create_roundtrips() {
        let store = PolicyStore::memory().unwrap();
        let policy = store
            .create("agent-1", spec(), "admin-1", "initial policy", now())
            .unwrap();
        assert!(policy.active);
        assert_eq!(policy.version_number, 1);
        let fetched = store.get_active("agent-1").unwrap();
        assert_eq!(fetched.policy_id, policy.policy_id);
    }

    #[test]
    fn modify_keeps_policy_id_and_bumps_version() {
        let store = PolicyStore::memory().unwrap();
        let created = store
            .create("agent-1", spec(), "admin-1", "initial policy", now())
            .unwrap();

        let mut widened = spec();
        widened.allowed_actions.push("read".to_string());
        let modified = store
            .modify(
                &created.policy_id,
                widened,
                "admin-1",
                "widen scope",
                later(),
            )
            .unwrap();

        assert_eq!(modified.policy_id, created.policy_id);
        assert_eq!(modified.version_number, 2);
        assert!(modified.active);

        let history = store.history(&created.policy_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].change_type, PolicyChangeKind::Created);
        assert_eq!(history[1].change_type, PolicyChangeKind::Modified);
        assert!(history[1].before.is_some());
    }

    #[test]
    fn creating_a_second_policy_deactivates_the_first() {
        let store = PolicyStore::memory().unwrap();
        let first = store
            .create("agent-1", spec(), "admin-1", "initial policy", now())
            .unwrap();
        let second = store
            .create("agent-1", spec(), "admin-1", "replacement policy", later())
            .unwrap();

        assert_ne!(first.policy_id, second.policy_id);
        let active = store.get_active("agent-1").unwrap();
        assert_eq!(active.policy_id, second.policy_id);

        let first_history = store.history(&first.policy_id).unwrap();
        assert_eq!(first_history.last().unwrap().change_type, PolicyChangeKind::Deactivated);
    }

    #[test]
    fn deactivate_writes_version_and_clears_active() {
        let store = PolicyStore::memory().unwrap();
        let created = store
            .create("agent-1", spec(), "admin-1", "initial policy", now())
            .unwrap();
        store
            .deactivate(&created.policy_id, "admin-1", "no longer needed", later())
            .unwrap();

        assert!(matches!(
            store.get_active("agent-1"),
            Err(PolicyError::NoActivePolicy { .. })
        ));
        let history = store.history(&created.policy_id).unwrap();
        assert_eq!(history.last().unwrap().change_type, PolicyChangeKind::Deactivated);
    }

    #[test]
    fn at_time_returns_the_version_active_at_t() {
        let store = PolicyStore::memory().unwrap();
        let created = store
            .create("agent-1", spec(), "admin-1", "initial policy", now())
            .unwrap();
        let mut widened = spec();
        widened.max_delegation_depth = 5;
        store
            .modify(&created.policy_id, widened, "admin-1", "raise depth", later())
            .unwrap();

        let at_creation = store.at_time(&created.policy_id, now()).unwrap().unwrap();
        assert_eq!(at_creation.max_delegation_depth, 3);

        let at_modification = store.at_time(&created.policy_id, later()).unwrap().unwrap();
        assert_eq!(at_modification.max_delegation_depth, 5);
    }

    #[test]
    fn empty_allow_lists_rejected() {
        let store = PolicyStore::memory().unwrap();
        let mut bad = spec();
        bad.allowed_actions = vec![];
        let result = store.create("agent-1", bad, "admin-1", "bad", now());
        assert!(matches!(result, Err(PolicyError::InvalidPolicy { .. })));
    }

    #[test]
    fn no_active_policy_errors() {
        let store = PolicyStore::memory().unwrap();
        let result = store.get_active("agent-unknown");
        assert!(matches!(result, Err(PolicyError::NoActivePolicy { .. })));
    }

    #[test]
    fn permits_checks_both_resource_and_action_glob() {
        let policy = AuthorityPolicy {
            policy_id: "p1".into(),
            principal_id: "agent-1".into(),
            allowed_resource_patterns: vec!["api:openai:*".into()],
            allowed_actions: vec!["api_call".into()],
            max_validity_seconds: 3600,
            allow_delegation: false,
            max_delegation_depth: 0,
            active: true,
            created_at: now(),
            created_by: "admin".into(),
            version_number: 1,
        };
        assert!(policy.permits("api:openai:chat", "api_call"));
        assert!(!policy.permits("api:openai:chat", "delete"));
        assert!(!policy.permits("db:prod:orders", "api_call"));
    }

    #[test]
    fn diff_reports_changed_fields() {
        let first = AuthorityPolicy {
            policy_id: "p1".into(),
            principal_id: "agent-1".into(),
            allowed_resource_patterns: vec!["api:openai:*".into()],
            allowed_actions: vec!["api_call".into()],
            max_validity_seconds: 3600,
            allow_delegation: true,
            max_delegation_depth: 3,
            active: true,
            created_at: now(),
            created_by: "admin".into(),
            version_number: 1,
        };
        let mut second = first.clone();
        second.allow_delegation = false;
        second.active = false;

        let diff = PolicyDiff::between(&first, &second);
        assert!(diff.changed_fields.contains(&"allow_delegation".to_string()));
        assert!(diff.changed_fields.contains(&"active".to_string()));
    }
}
