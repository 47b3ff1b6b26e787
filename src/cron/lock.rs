// src/cron/lock.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::cron::CronJob;
use crate::errors::{JobQueueError, Result};
use crate::store::JobStore;

/// Result of trying to take the run slot of a recurring command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// This runner owns the slot; `last_run_at` is now this value.
    Acquired(DateTime<Utc>),
    /// Another runner moved `last_run_at` first; this is what it holds now.
    Lost(DateTime<Utc>),
}

impl LockOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockOutcome::Acquired(_))
    }

    /// The `last_run_at` value to remember for the next attempt.
    pub fn last_run_at(&self) -> DateTime<Utc> {
        match self {
            LockOutcome::Acquired(at) | LockOutcome::Lost(at) => *at,
        }
    }
}

/// Optimistic lock on the `last_run_at` column of [`CronJob`] rows.
///
/// Acquiring is a single conditional update keyed on the value the caller
/// last saw, so of several runners that saw the same value exactly one wins.
#[derive(Debug, Clone)]
pub struct CronLock<S: JobStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: JobStore> CronLock<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Load every stored row.
    pub fn load_all(&self) -> Result<Vec<CronJob>> {
        self.store.transaction(|tx| tx.load_cron_jobs())
    }

    /// Return the row for `command`, inserting one stamped with the current
    /// time if it does not exist yet.
    pub fn get_or_create(&self, command: &str) -> Result<CronJob> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            let fresh = CronJob {
                command: command.to_string(),
                last_run_at: now,
            };
            if tx.insert_cron_job(&fresh)? {
                debug!(command, "registered recurring command");
                return Ok(fresh);
            }
            tx.load_cron_job(command)?.ok_or_else(|| {
                JobQueueError::NotFound(format!("cron row for '{command}' vanished"))
            })
        })
    }

    pub fn acquire(&self, command: &str, last_seen: DateTime<Utc>) -> Result<LockOutcome> {
        let now = self.clock.now();
        self.store.transaction(|tx| {
            match tx.compare_and_swap_last_run(command, last_seen, now) {
                Ok(()) => Ok(LockOutcome::Acquired(now)),
                Err(JobQueueError::StorageConflict(_)) => {
                    let current = tx.load_cron_job(command)?.ok_or_else(|| {
                        JobQueueError::NotFound(format!("no cron row for '{command}'"))
                    })?;
                    debug!(command, current = %current.last_run_at, "lost cron lock");
                    Ok(LockOutcome::Lost(current.last_run_at))
                }
                Err(err) => Err(err),
            }
        })
    }
}
