//! Nonce + timestamp replay protection for the proxy path.
//!
//! A request is replay-protected only when it carries both
//! `X-Caracal-Nonce` and `X-Caracal-Timestamp`; the gateway can't detect a
//! replay of a request that never identified itself. `check_and_record`
//! rejects a timestamp outside the window first (cheap, no lock contention)
//! and only then takes the nonce-set lock, so a flood of stale timestamps
//! can't be used to grow the tracked-nonce set.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_REPLAY_WINDOW_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("timestamp is outside the replay window")]
    TimestampOutOfWindow,
    #[error("nonce was already seen within the replay window")]
    NonceReplayed,
}

struct Tracked {
    order: VecDeque<(String, DateTime<Utc>)>,
    seen: HashSet<String>,
}

pub struct ReplayGuard {
    window: Duration,
    tracked: Mutex<Tracked>,
}

impl ReplayGuard {
    pub fn new(window_seconds: i64) -> Self {
        Self {
            window: Duration::seconds(window_seconds),
            tracked: Mutex::new(Tracked {
                order: VecDeque::new(),
                seen: HashSet::new(),
            }),
        }
    }

    pub fn check_and_record(
        &self,
        nonce: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ReplayError> {
        if (now - timestamp).abs() > self.window {
            return Err(ReplayError::TimestampOutOfWindow);
        }

        let mut tracked = self.tracked.lock().unwrap();
        while let Some((_, seen_at)) = tracked.order.front() {
            if now - *seen_at > self.window {
                let (stale_nonce, _) = tracked.order.pop_front().unwrap();
                tracked.seen.remove(&stale_nonce);
            } else {
                break;
            }
        }

        if !tracked.seen.insert(nonce.to_string()) {
            return Err(ReplayError::NonceReplayed);
        }
        tracked.order.push_back((nonce.to_string(), now));
        Ok(())
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW_SECONDS)
    }
}
