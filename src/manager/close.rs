// src/manager/close.rs

//! Closing jobs: the retry and cascade state machine.
//!
//! Closing a job with some terminal state works as follows:
//!
//! - A failed chain root with retries left stays `Running` and gets a new
//!   `Pending` retry, delayed by the retry scheduler.
//! - Otherwise the job takes the state. A retry forwards the state to its
//!   root, which may spawn the next attempt or end the chain.
//! - A root that ends unsuccessfully cancels its pending retries and every
//!   pending job waiting on it, recursively.
//!
//! One call is one transaction; events are published after commit.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::errors::{JobQueueError, Result};
use crate::job::{Job, JobId, JobState, NewJob};
use crate::manager::{JobManager, StateChangeEvent, load_existing};
use crate::retry::RetryScheduler;
use crate::store::{JobStore, StoreTx};

impl<S: JobStore> JobManager<S> {
    /// Move a job into a terminal state and apply retries and cascades.
    ///
    /// Returns the job as stored afterwards; a failed root that spawned a
    /// retry is still `Running`.
    pub fn close_job(&self, id: JobId, state: JobState) -> Result<Job> {
        let now = self.clock.now();

        let (job, events) = self.store.transaction(|tx| {
            let job = load_existing(tx, id)?;
            if !state.is_terminal() || !job.state.can_transition_to(state) {
                return Err(JobQueueError::InvalidTransition {
                    job: id,
                    from: job.state,
                    to: state,
                });
            }
            if state == JobState::Failed && has_live_retry(&*tx, &job)? {
                return Err(JobQueueError::InvalidTransition {
                    job: id,
                    from: job.state,
                    to: state,
                });
            }

            let mut pass = ClosePass::new(tx, self.retry.as_ref(), now);
            pass.close(job, state)?;
            let events = pass.finish();

            Ok((load_existing(tx, id)?, events))
        })?;

        debug!(job_id = %id, events = events.len(), "closed job");
        self.publish(&events);
        Ok(job)
    }
}

/// A root whose latest retry has not closed yet already has an attempt in
/// flight; failing it again would start a second one.
fn has_live_retry(tx: &dyn StoreTx, job: &Job) -> Result<bool> {
    if job.is_retry_job() {
        return Ok(false);
    }
    match job.retry_jobs.last() {
        Some(last) => Ok(tx
            .load_job(*last)?
            .is_some_and(|retry| !retry.state.is_terminal())),
        None => Ok(false),
    }
}

/// One recursive close, bound to a single transaction.
pub(crate) struct ClosePass<'a> {
    tx: &'a mut dyn StoreTx,
    retry: &'a dyn RetryScheduler,
    now: DateTime<Utc>,
    visited: HashSet<JobId>,
    events: Vec<StateChangeEvent>,
}

impl<'a> ClosePass<'a> {
    pub(crate) fn new(
        tx: &'a mut dyn StoreTx,
        retry: &'a dyn RetryScheduler,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tx,
            retry,
            now,
            visited: HashSet::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn finish(self) -> Vec<StateChangeEvent> {
        self.events
    }

    pub(crate) fn close(&mut self, mut job: Job, state: JobState) -> Result<()> {
        if job.state.is_terminal() || !self.visited.insert(job.id) {
            return Ok(());
        }

        if state == JobState::Failed && job.is_retry_allowed() {
            return self.spawn_retry(&job);
        }

        let old = job.state;
        job.transition_to(state, self.now)?;
        self.tx.update_job(&job)?;
        self.events.push(StateChangeEvent::new(&job, old, state));

        if let Some(original) = job.original_job {
            if let Some(root) = self.tx.load_job(original)? {
                self.close(root, state)?;
            }
            return Ok(());
        }

        if state != JobState::Finished {
            self.cancel_pending(&job.retry_jobs)?;
            let dependents = self.tx.dependents_of(job.id)?;
            if !dependents.is_empty() {
                debug!(
                    job_id = %job.id,
                    dependents = dependents.len(),
                    "canceling pending dependents"
                );
            }
            self.cancel_pending(&dependents)?;
        }

        Ok(())
    }

    fn cancel_pending(&mut self, ids: &[JobId]) -> Result<()> {
        for id in ids {
            if let Some(job) = self.tx.load_job(*id)? {
                if job.state == JobState::Pending {
                    self.close(job, JobState::Canceled)?;
                }
            }
        }
        Ok(())
    }

    fn spawn_retry(&mut self, root: &Job) -> Result<()> {
        let attempt = u32::try_from(root.retry_jobs.len()).unwrap_or(u32::MAX);
        let delay = self.retry.delay_for(attempt);
        let execute_after = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| self.now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let retry_id = self
            .tx
            .insert_job(&NewJob::retry_of(root, execute_after), self.now)?;

        info!(
            job_id = %root.id,
            retry_job_id = %retry_id,
            attempt = attempt.saturating_add(1),
            max_retries = root.max_retries,
            delay_secs = delay.as_secs(),
            "job failed; scheduled retry"
        );
        self.events
            .push(StateChangeEvent::new(root, root.state, JobState::Failed));
        Ok(())
    }
}
