//! Principal identity store.
//!
//! A principal is never deleted, only deactivated, and `parent_id` is fixed
//! at creation — a new principal's id cannot already appear in its chosen
//! parent's ancestor chain, since it doesn't exist until the insert commits.
//! The delegation graph is therefore acyclic by construction; there is no
//! reparent operation to reintroduce the risk.

use crate::error::PolicyError;
use crate::schema::POLICY_SCHEMA;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    Agent,
    Service,
}

impl PrincipalType {
    fn as_str(self) -> &'static str {
        match self {
            PrincipalType::User => "user",
            PrincipalType::Agent => "agent",
            PrincipalType::Service => "service",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(PrincipalType::User),
            "agent" => Some(PrincipalType::Agent),
            "service" => Some(PrincipalType::Service),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub principal_id: String,
    pub name: String,
    pub owner: String,
    pub principal_type: PrincipalType,
    pub parent_id: Option<String>,
    pub public_key: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields required to register a new principal.
#[derive(Debug, Clone)]
pub struct NewPrincipal {
    pub name: String,
    pub owner: String,
    pub principal_type: PrincipalType,
    pub parent_id: Option<String>,
    pub public_key: Option<String>,
}

#[derive(Clone)]
pub struct PrincipalStore {
    conn: Arc<Mutex<Connection>>,
}

impl PrincipalStore {
    pub fn open(path: &Path) -> Result<Self, PolicyError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
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

    /// Register a principal, rejecting the insert if `parent_id` would close
    /// a cycle in the delegation graph.
    pub fn create(&self, new: NewPrincipal, now: DateTime<Utc>) -> Result<Principal, PolicyError> {
        let principal_id = uuid::Uuid::new_v4().to_string();
        let conn = self.conn.lock().unwrap();

        if let Some(parent_id) = &new.parent_id {
            if !Self::exists(&conn, parent_id)? {
                return Err(PolicyError::PrincipalNotFound {
                    principal_id: parent_id.clone(),
                });
            }
        }

        let inserted = conn.execute(
            "INSERT INTO principals
                (principal_id, name, owner, principal_type, parent_id, public_key, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7)",
            params![
                principal_id,
                new.name,
                new.owner,
                new.principal_type.as_str(),
                new.parent_id,
                new.public_key,
                now.to_rfc3339(),
            ],
        );

        match inserted {
            Ok(_) => Ok(Principal {
                principal_id,
                name: new.name,
                owner: new.owner,
                principal_type: new.principal_type,
                parent_id: new.parent_id,
                public_key: new.public_key,
                active: true,
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(PolicyError::DuplicateName { name: new.name })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, principal_id: &str) -> Result<Principal, PolicyError> {
        let conn = self.conn.lock().unwrap();
        Self::get_row(&conn, principal_id)?.ok_or_else(|| PolicyError::PrincipalNotFound {
            principal_id: principal_id.to_string(),
        })
    }

    pub fn get_by_name(&self, name: &str) -> Result<Principal, PolicyError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT principal_id, name, owner, principal_type, parent_id, public_key, active, created_at
             FROM principals WHERE name = ?1",
            params![name],
            Self::row_to_principal,
        )
        .optional()?
        .ok_or_else(|| PolicyError::PrincipalNotFound {
            principal_id: name.to_string(),
        })
    }

    pub fn deactivate(&self, principal_id: &str) -> Result<(), PolicyError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE principals SET active = 0 WHERE principal_id = ?1",
            params![principal_id],
        )?;
        if updated == 0 {
            return Err(PolicyError::PrincipalNotFound {
                principal_id: principal_id.to_string(),
            });
        }
        Ok(())
    }

    /// All active principals, ordered by creation time. The snapshot
    /// builder uses this to capture identity state as of a point in time;
    /// deactivated principals are excluded since a snapshot only needs to
    /// reconstruct what's currently authoritative.
    pub fn list_active(&self) -> Result<Vec<Principal>, PolicyError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT principal_id, name, owner, principal_type, parent_id, public_key, active, created_at
             FROM principals WHERE active = 1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_principal)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn exists(conn: &Connection, principal_id: &str) -> Result<bool, PolicyError> {
        Ok(Self::get_row(conn, principal_id)?.is_some())
    }

    fn get_row(conn: &Connection, principal_id: &str) -> Result<Option<Principal>, PolicyError> {
        conn.query_row(
            "SELECT principal_id, name, owner, principal_type, parent_id, public_key, active, created_at
             FROM principals WHERE principal_id = ?1",
            params![principal_id],
            Self::row_to_principal,
        )
        .optional()
        .map_err(PolicyError::from)
    }

    fn row_to_principal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Principal> {
        let principal_type: String = row.get(3)?;
        let created_at: String = row.get(7)?;
        Ok(Principal {
            principal_id: row.get(0)?,
            name: row.get(1)?,
            owner: row.get(2)?,
            principal_type: PrincipalType::parse(&principal_type).unwrap_or(PrincipalType::Agent),
            parent_id: row.get(4)?,
            public_key: row.get(5)?,
            active: row.get::<_, i64>(6)? != 0,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .unwrap()
                .with_timezone(&Utc),
        })
    }

}

/// Checks a batch of principals for cyclic `parent_id` edges before import.
///
/// Used by offline validation tooling that ingests a full principal set from
/// a file, where edges may reference entries later in the same batch and the
/// per-insert ordering guarantee the live store relies on doesn't apply.
pub fn validate_acyclic(principals: &[Principal]) -> Result<(), PolicyError> {
    use std::collections::HashMap;

    let parent_of: HashMap<&str, &str> = principals
        .iter()
        .filter_map(|p| p.parent_id.as_deref().map(|parent| (p.principal_id.as_str(), parent)))
        .collect();

    for principal in principals {
        let mut current = principal.principal_id.as_str();
        let mut seen = std::collections::HashSet::new();
        while let Some(&parent) = parent_of.get(current) {
            if !seen.insert(parent) {
                return Err(PolicyError::CyclicDelegation {
                    principal_id: principal.principal_id.clone(),
                    parent_id: parent.to_string(),
                });
            }
            current = parent;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 10, 0, 0).unwrap()
    }

    fn root(store: &PrincipalStore) -> Principal {
        store
            .create(
                NewPrincipal {
                    name: "root".into(),
                    owner: "ops".into(),
                    principal_type: PrincipalType::Service,
                    parent_id: None,
                    public_key: None,
                },
                now(),
            )
            .unwrap()
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = PrincipalStore::memory().unwrap();
        let created = root(&store);
        let fetched = store.get(&created.principal_id).unwrap();
        assert_eq!(fetched.name, "root");
        assert!(fetched.active);
    }

    #[test]
    fn duplicate_name_rejected() {
        let store = PrincipalStore::memory().unwrap();
        root(&store);
        let result = store.create(
            NewPrincipal {
                name: "root".into(),
                owner: "ops".into(),
                principal_type: PrincipalType::Agent,
                parent_id: None,
                public_key: None,
            },
            now(),
        );
        assert!(matches!(result, Err(PolicyError::DuplicateName { .. })));
    }

    #[test]
    fn delegation_chain_is_accepted() {
        let store = PrincipalStore::memory().unwrap();
        let r = root(&store);
        let child = store
            .create(
                NewPrincipal {
                    name: "agent-1".into(),
                    owner: "ops".into(),
                    principal_type: PrincipalType::Agent,
                    parent_id: Some(r.principal_id.clone()),
                    public_key: None,
                },
                now(),
            )
            .unwrap();
        assert_eq!(child.parent_id.as_deref(), Some(r.principal_id.as_str()));
    }

    #[test]
    fn unknown_parent_rejected() {
        let store = PrincipalStore::memory().unwrap();
        let result = store.create(
            NewPrincipal {
                name: "agent-1".into(),
                owner: "ops".into(),
                principal_type: PrincipalType::Agent,
                parent_id: Some("does-not-exist".into()),
                public_key: None,
            },
            now(),
        );
        assert!(matches!(result, Err(PolicyError::PrincipalNotFound { .. })));
    }

    #[test]
    fn deactivate_marks_inactive() {
        let store = PrincipalStore::memory().unwrap();
        let r = root(&store);
        store.deactivate(&r.principal_id).unwrap();
        assert!(!store.get(&r.principal_id).unwrap().active);
    }

    fn batch_principal(id: &str, parent: Option<&str>) -> Principal {
        Principal {
            principal_id: id.to_string(),
            name: id.to_string(),
            owner: "ops".to_string(),
            principal_type: PrincipalType::Agent,
            parent_id: parent.map(str::to_string),
            public_key: None,
            active: true,
            created_at: now(),
        }
    }

    #[test]
    fn validate_acyclic_accepts_a_tree() {
        let batch = vec![
            batch_principal("a", None),
            batch_principal("b", Some("a")),
            batch_principal("c", Some("b")),
        ];
        assert!(validate_acyclic(&batch).is_ok());
    }

    #[test]
    fn validate_acyclic_rejects_a_cycle() {
        let batch = vec![
            batch_principal("a", Some("c")),
            batch_principal("b", Some("a")),
            batch_principal("c", Some("b")),
        ];
        assert!(matches!(
            validate_acyclic(&batch),
            Err(PolicyError::CyclicDelegation { .. })
        ));
    }

    #[test]
    fn validate_acyclic_rejects_self_parent() {
        let batch = vec![batch_principal("a", Some("a"))];
        assert!(matches!(
            validate_acyclic(&batch),
            Err(PolicyError::CyclicDelegation { .. })
        ));
    }
}
