//! The `Clock` capability.
//!
//! §9's design notes call for passing collaborators explicitly rather than
//! reaching for a global `Utc::now()` everywhere: the evaluator and the
//! mandate manager both take a `Clock` so tests can freeze time instead of
//! racing the wall clock.

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
