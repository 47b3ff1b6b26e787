// src/clock/mod.rs

use std::fmt::Debug;

use chrono::{DateTime, SubsecRound, Utc};

pub mod mock;

/// Abstract wall-clock.
///
/// Timestamps are truncated to microseconds so a value written to storage
/// reads back bit-for-bit equal; the cron lock compares them for equality.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Implementation that uses the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}
