//! `caracal replay` - rewind a consumer group's committed offset, optionally
//! draining the rewound range immediately.

use anyhow::{Context, Result};
use caracal_core::event_bus::{EventBus, ReplayStatus, Topic};
use chrono::Utc;

use crate::cli::args::ReplayArgs;
use crate::exit_codes;

const ALL_TOPICS: &[Topic] = &[
    Topic::AuthorityEvents,
    Topic::MeteringEvents,
    Topic::PolicyChanges,
    Topic::AgentLifecycle,
];

pub fn run(args: ReplayArgs) -> i32 {
    match run_replay(&args) {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::DEPENDENCY_UNAVAILABLE
        }
    }
}

fn resolve_topics(names: &[String]) -> Result<Vec<Topic>> {
    if names.is_empty() {
        return Ok(ALL_TOPICS.to_vec());
    }
    names
        .iter()
        .map(|name| {
            ALL_TOPICS
                .iter()
                .copied()
                .find(|t| t.as_str() == name)
                .ok_or_else(|| anyhow::anyhow!("unknown topic: {name}"))
        })
        .collect()
}

fn run_replay(args: &ReplayArgs) -> Result<()> {
    let bus = EventBus::open(&args.db)
        .with_context(|| format!("failed to open event bus: {}", args.db.display()))?;
    let topics = resolve_topics(&args.topics)?;
    let now = Utc::now();

    let job = bus
        .start_replay(&args.group, &topics, args.from_offset, now)
        .context("failed to start replay")?;

    println!("Replay started: {}", job.replay_id);
    println!("  group:  {}", job.consumer_group);
    println!("  topics: {}", job.topics.join(", "));
    println!(
        "  rewound to offset: {}",
        args.from_offset.map(|o| o.to_string()).unwrap_or_else(|| "start".to_string())
    );

    if !args.drain {
        println!();
        println!("Rewind complete. The consumer group will replay from here on its next poll.");
        return Ok(());
    }

    let mut processed: u64 = 0;
    for topic in &topics {
        loop {
            let batch = bus.poll(&args.group, *topic, 100)?;
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                println!(
                    "[{}] offset={} key={} value={}",
                    topic.as_str(),
                    event.offset,
                    event.key,
                    event.value
                );
                bus.commit_offset(&args.group, *topic, event.offset)?;
                processed += 1;
            }
        }
    }

    bus.complete_replay(&job.replay_id, processed, ReplayStatus::Completed, Utc::now())
        .context("failed to mark replay complete")?;

    println!();
    println!("Drained {processed} event(s).");
    Ok(())
}
