//! Durable event bus.
//!
//! The data model treats the broker as an assumed dependency: a partitioned,
//! ordered, durable log that a producer appends to and a consumer group
//! drains with committed offsets. No Kafka client is available here, so
//! this follows the same idiom every other store in this workspace uses —
//! an `Arc<Mutex<Connection>>`-backed SQLite table — generalized into an
//! append-only log with per-consumer-group offsets. A single partition per
//! topic is enough to keep the ordering guarantees real without pulling in
//! a broker client.
//!
//! Exactly-once processing at the consumer boundary is a transaction
//! spanning "do the downstream write" and "commit the offset" (see
//! `ledger.rs`, which is the only consumer this crate ships); this module
//! only guarantees produce-side durability and consume-side visibility.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS event_log (
    row_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    topic         TEXT NOT NULL,
    topic_offset  INTEGER NOT NULL,
    key           TEXT NOT NULL,
    value_json    TEXT NOT NULL,
    created_at    TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_event_log_topic_offset ON event_log(topic, topic_offset);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    consumer_group    TEXT NOT NULL,
    topic             TEXT NOT NULL,
    committed_offset  INTEGER NOT NULL,
    PRIMARY KEY (consumer_group, topic)
);

CREATE TABLE IF NOT EXISTS replay_jobs (
    replay_id          TEXT PRIMARY KEY,
    consumer_group     TEXT NOT NULL,
    topics             TEXT NOT NULL,
    start_time         TEXT,
    end_time           TEXT,
    events_processed   INTEGER NOT NULL DEFAULT 0,
    status             TEXT NOT NULL
);
"#;

/// The fixed set of topics this service produces to and consumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    AuthorityEvents,
    MeteringEvents,
    PolicyChanges,
    AgentLifecycle,
    Dlq,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::AuthorityEvents => "authority.events",
            Topic::MeteringEvents => "metering.events",
            Topic::PolicyChanges => "policy.changes",
            Topic::AgentLifecycle => "agent.lifecycle",
            Topic::Dlq => "dlq",
        }
    }
}

/// A message as delivered to a consumer: enough to process it and, on
/// failure, to build a DLQ envelope without re-deriving anything.
#[derive(Debug, Clone)]
pub struct ConsumedEvent {
    pub topic: Topic,
    pub offset: i64,
    pub key: String,
    pub value: serde_json::Value,
}

/// The envelope written to `dlq` when a message exhausts its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEnvelope {
    pub original_topic: String,
    pub offset: i64,
    pub key: String,
    pub value: serde_json::Value,
    pub error_type: String,
    pub error_message: String,
    pub retry_count: u32,
    pub failed_at: DateTime<Utc>,
    pub consumer_group: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ReplayJob {
    pub replay_id: String,
    pub consumer_group: String,
    pub topics: Vec<String>,
    pub events_processed: u64,
    pub status: ReplayStatus,
}

#[derive(Clone)]
pub struct EventBus {
    conn: Arc<Mutex<Connection>>,
}

impl EventBus {
    pub fn open(path: &std::path::Path) -> Result<Self, CoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn memory() -> Result<Self, CoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Append a message to `topic`, keyed for downstream partition-affinity
    /// (principal_id, or mandate_id where that gives better locality).
    /// Returns the offset it was assigned.
    pub fn produce(
        &self,
        topic: Topic,
        key: &str,
        value: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64, CoreError> {
        let conn = self.conn.lock().unwrap();
        let next_offset: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(topic_offset), -1) + 1 FROM event_log WHERE topic = ?1",
                params![topic.as_str()],
                |row| row.get(0),
            )
            .map_err(CoreError::from)?;
        conn.execute(
            "INSERT INTO event_log (topic, topic_offset, key, value_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                topic.as_str(),
                next_offset,
                key,
                serde_json::to_string(value).unwrap(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(next_offset)
    }

    /// Pull up to `max` unconsumed messages for `group` on `topic`, in
    /// offset order. Does not advance the committed offset; callers commit
    /// only after the downstream effect (ledger write, cache invalidation,
    /// ...) has landed, in the same transaction where possible.
    pub fn poll(
        &self,
        group: &str,
        topic: Topic,
        max: usize,
    ) -> Result<Vec<ConsumedEvent>, CoreError> {
        let conn = self.conn.lock().unwrap();
        let committed = Self::committed_offset_row(&conn, group, topic)?;
        let mut stmt = conn.prepare(
            "SELECT topic_offset, key, value_json FROM event_log
             WHERE topic = ?1 AND topic_offset > ?2
             ORDER BY topic_offset ASC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![topic.as_str(), committed, max as i64], |row| {
                let offset: i64 = row.get(0)?;
                let key: String = row.get(1)?;
                let value_json: String = row.get(2)?;
                Ok((offset, key, value_json))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(offset, key, value_json)| ConsumedEvent {
                topic,
                offset,
                key,
                value: serde_json::from_str(&value_json).unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    /// Commit that `group` has durably processed every message on `topic`
    /// up to and including `offset`.
    pub fn commit_offset(&self, group: &str, topic: Topic, offset: i64) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO consumer_offsets (consumer_group, topic, committed_offset)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(consumer_group, topic) DO UPDATE SET committed_offset = excluded.committed_offset",
            params![group, topic.as_str(), offset],
        )?;
        Ok(())
    }

    pub fn committed_offset(&self, group: &str, topic: Topic) -> Result<i64, CoreError> {
        let conn = self.conn.lock().unwrap();
        Self::committed_offset_row(&conn, group, topic)
    }

    fn committed_offset_row(conn: &Connection, group: &str, topic: Topic) -> Result<i64, CoreError> {
        conn.query_row(
            "SELECT committed_offset FROM consumer_offsets WHERE consumer_group = ?1 AND topic = ?2",
            params![group, topic.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map(|v| v.unwrap_or(-1))
        .map_err(CoreError::from)
    }

    /// Write a DLQ envelope for a message that exhausted its retry budget,
    /// then commit progress past it so the consumer group doesn't wedge.
    pub fn send_to_dlq(
        &self,
        group: &str,
        event: &ConsumedEvent,
        error_type: &str,
        error_message: &str,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let envelope = DlqEnvelope {
            original_topic: event.topic.as_str().to_string(),
            offset: event.offset,
            key: event.key.clone(),
            value: event.value.clone(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            retry_count,
            failed_at: now,
            consumer_group: group.to_string(),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        self.produce(Topic::Dlq, &event.key, &value, now)?;
        self.commit_offset(group, event.topic, event.offset)
    }

    /// Start a replay: resets `group`'s committed offsets for `topics` back
    /// to `from_offset` (or to the very start if `None`), returning a job id
    /// to track progress. The consumer loop drains normally from there; this
    /// call only rewinds the bookmark.
    pub fn start_replay(
        &self,
        group: &str,
        topics: &[Topic],
        from_offset: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ReplayJob, CoreError> {
        let conn = self.conn.lock().unwrap();
        let replay_id = format!("replay:{}", Uuid::new_v4());
        let topic_names: Vec<String> = topics.iter().map(|t| t.as_str().to_string()).collect();
        let rewind_to = from_offset.unwrap_or(-1);
        for topic in topics {
            conn.execute(
                "INSERT INTO consumer_offsets (consumer_group, topic, committed_offset)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(consumer_group, topic) DO UPDATE SET committed_offset = excluded.committed_offset",
                params![group, topic.as_str(), rewind_to],
            )?;
        }
        conn.execute(
            "INSERT INTO replay_jobs (replay_id, consumer_group, topics, start_time, status)
             VALUES (?1, ?2, ?3, ?4, 'running')",
            params![
                replay_id,
                group,
                serde_json::to_string(&topic_names).unwrap(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(ReplayJob {
            replay_id,
            consumer_group: group.to_string(),
            topics: topic_names,
            events_processed: 0,
            status: ReplayStatus::Running,
        })
    }

    pub fn complete_replay(
        &self,
        replay_id: &str,
        events_processed: u64,
        status: ReplayStatus,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let conn = self.conn.lock().unwrap();
        let status_str = match status {
            ReplayStatus::Running => "running",
            ReplayStatus::Completed => "completed",
            ReplayStatus::Failed => "failed",
        };
        conn.execute(
            "UPDATE replay_jobs SET events_processed = ?2, status = ?3, end_time = ?4
             WHERE replay_id = ?1",
            params![replay_id, events_processed as i64, status_str, now.to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 28, 12, 0, 0).unwrap()
    }

    #[test]
    fn produce_assigns_increasing_offsets() {
        let bus = EventBus::memory().unwrap();
        let o1 = bus.produce(Topic::AuthorityEvents, "p1", &json!({"n": 1}), now()).unwrap();
        let o2 = bus.produce(Topic::AuthorityEvents, "p1", &json!({"n": 2}), now()).unwrap();
        assert_eq!(o1, 0);
        assert_eq!(o2, 1);
    }

    #[test]
    fn poll_respects_committed_offset() {
        let bus = EventBus::memory().unwrap();
        bus.produce(Topic::PolicyChanges, "p1", &json!({"n": 1}), now()).unwrap();
        bus.produce(Topic::PolicyChanges, "p1", &json!({"n": 2}), now()).unwrap();

        let batch = bus.poll("cache-invalidator", Topic::PolicyChanges, 10).unwrap();
        assert_eq!(batch.len(), 2);

        bus.commit_offset("cache-invalidator", Topic::PolicyChanges, 0).unwrap();
        let remaining = bus.poll("cache-invalidator", Topic::PolicyChanges, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].offset, 1);
    }

    #[test]
    fn dlq_records_failure_and_advances_offset() {
        let bus = EventBus::memory().unwrap();
        bus.produce(Topic::MeteringEvents, "p1", &json!({"n": 1}), now()).unwrap();
        let batch = bus.poll("ledger-writer", Topic::MeteringEvents, 10).unwrap();
        let event = &batch[0];

        bus.send_to_dlq("ledger-writer", event, "Transient", "db unavailable", 5, now())
            .unwrap();

        assert_eq!(bus.committed_offset("ledger-writer", Topic::MeteringEvents).unwrap(), 0);
        let dlq_batch = bus.poll("dlq-consumer", Topic::Dlq, 10).unwrap();
        assert_eq!(dlq_batch.len(), 1);
    }

    #[test]
    fn replay_rewinds_committed_offset() {
        let bus = EventBus::memory().unwrap();
        bus.produce(Topic::AuthorityEvents, "p1", &json!({"n": 1}), now()).unwrap();
        bus.produce(Topic::AuthorityEvents, "p1", &json!({"n": 2}), now()).unwrap();
        bus.commit_offset("ledger-writer", Topic::AuthorityEvents, 1).unwrap();

        let job = bus
            .start_replay("ledger-writer", &[Topic::AuthorityEvents], None, now())
            .unwrap();
        assert_eq!(job.status, ReplayStatus::Running);
        assert_eq!(bus.committed_offset("ledger-writer", Topic::AuthorityEvents).unwrap(), -1);

        let replayed = bus.poll("ledger-writer", Topic::AuthorityEvents, 10).unwrap();
        assert_eq!(replayed.len(), 2);
    }
}
