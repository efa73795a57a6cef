//! SQLite schema for the identity and authority-policy store.
//!
//! Tables:
//! - `principals`: stable identities, append-only except for `active`
//! - `authority_policies`: the current row per `policy_id`
//! - `policy_versions`: immutable version history, one row per transition

/// DDL for principal and policy storage.
pub const POLICY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS principals (
    principal_id     TEXT PRIMARY KEY,
    name             TEXT NOT NULL UNIQUE,
    owner            TEXT NOT NULL,
    principal_type   TEXT NOT NULL,
    parent_id        TEXT REFERENCES principals(principal_id),
    public_key       TEXT,
    active           INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS authority_policies (
    policy_id                 TEXT PRIMARY KEY,
    principal_id              TEXT NOT NULL REFERENCES principals(principal_id),
    allowed_resource_patterns TEXT NOT NULL,
    allowed_actions           TEXT NOT NULL,
    max_validity_seconds      INTEGER NOT NULL,
    allow_delegation          INTEGER NOT NULL,
    max_delegation_depth      INTEGER NOT NULL,
    active                    INTEGER NOT NULL,
    created_at                TEXT NOT NULL,
    created_by                TEXT NOT NULL,
    version_number            INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS policy_versions (
    version_id       TEXT PRIMARY KEY,
    policy_id        TEXT NOT NULL,
    principal_id     TEXT NOT NULL,
    change_type      TEXT NOT NULL,
    before_json      TEXT,
    after_json       TEXT NOT NULL,
    changed_by       TEXT NOT NULL,
    change_reason    TEXT NOT NULL,
    changed_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_policies_principal_active
    ON authority_policies(principal_id, active);
CREATE INDEX IF NOT EXISTS idx_policy_versions_policy_id
    ON policy_versions(policy_id);
CREATE INDEX IF NOT EXISTS idx_principals_parent_id
    ON principals(parent_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_is_valid_sql() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(POLICY_SCHEMA).unwrap();
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(POLICY_SCHEMA).unwrap();
        conn.execute_batch(POLICY_SCHEMA).unwrap();
    }
}
