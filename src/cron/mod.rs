// src/cron/mod.rs

//! Recurring jobs.
//!
//! - [`JobScheduler`] decides when a command is due and what job it creates.
//! - [`CronLock`] makes sure only one of several concurrent runners fires a
//!   due command.
//! - [`CronRunner`] drives the schedule loop.

pub mod lock;
pub mod runner;
pub mod schedulers;

use std::fmt::Debug;

use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::job::NewJob;

pub use lock::{CronLock, LockOutcome};
pub use runner::{CronRunner, CycleReport, RunSummary, RunnerOptions, ScheduleContext};
pub use schedulers::{CronExpressionScheduler, IntervalScheduler, JobTemplate};

/// Persisted bookkeeping for one recurring command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub command: String,
    pub last_run_at: DateTime<Utc>,
}

/// Source of recurring jobs.
pub trait JobScheduler: Send + Sync + Debug {
    /// Commands this scheduler is responsible for.
    fn commands(&self) -> Vec<String>;

    fn should_schedule(
        &self,
        command: &str,
        last_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool;

    fn create_job(&self, command: &str, last_run_at: DateTime<Utc>) -> Result<NewJob>;
}
