use assert_cmd::Command;
use caracal_core::EventBus;
use caracal_core::event_bus::Topic;
use chrono::Utc;
use serde_json::json;
use tempfile::tempdir;

fn caracal() -> Command {
    Command::cargo_bin("caracal").expect("caracal binary should be built")
}

#[test]
fn replay_rewinds_and_drains_committed_events() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("bus.db");

    {
        let bus = EventBus::open(&db_path).unwrap();
        let now = Utc::now();
        for i in 0..3 {
            bus.produce(
                Topic::AuthorityEvents,
                "principal:agent-1",
                &json!({ "seq": i }),
                now,
            )
            .unwrap();
        }
        bus.poll("ledger-writer", Topic::AuthorityEvents, 10).unwrap();
        bus.commit_offset("ledger-writer", Topic::AuthorityEvents, 2).unwrap();
    }

    caracal()
        .arg("replay")
        .args(["--db"])
        .arg(&db_path)
        .args(["--group", "ledger-writer"])
        .args(["--topics", "authority.events"])
        .arg("--drain")
        .assert()
        .success()
        .stdout(predicates::str::contains("Drained 3 event(s)"));

    let bus = EventBus::open(&db_path).unwrap();
    assert_eq!(bus.committed_offset("ledger-writer", Topic::AuthorityEvents).unwrap(), 2);
}

#[test]
fn replay_without_drain_only_rewinds_the_bookmark() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("bus.db");

    {
        let bus = EventBus::open(&db_path).unwrap();
        let now = Utc::now();
        bus.produce(Topic::MeteringEvents, "principal:agent-1", &json!({"cost": 1.0}), now)
            .unwrap();
        bus.commit_offset("metering-group", Topic::MeteringEvents, 0).unwrap();
    }

    caracal()
        .arg("replay")
        .args(["--db"])
        .arg(&db_path)
        .args(["--group", "metering-group"])
        .args(["--topics", "metering.events"])
        .assert()
        .success();

    let bus = EventBus::open(&db_path).unwrap();
    assert_eq!(bus.committed_offset("metering-group", Topic::MeteringEvents).unwrap(), -1);
}
