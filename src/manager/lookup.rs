// src/manager/lookup.rs

//! Lookups and worker-side job selection.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::encode_args;
use crate::errors::{JobQueueError, Result};
use crate::job::{EntityRef, Job, JobId, JobState, NewJob, RelatedEntities};
use crate::manager::close::ClosePass;
use crate::manager::{JobManager, StateChangeEvent, load_existing};
use crate::store::{JobStore, PendingJobQuery, QueueFilter, StoreTx};

/// How the dependencies of a pending job stand right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DependencyStatus {
    /// Every dependency finished.
    Satisfied,
    /// Some dependency has not finished yet.
    Waiting,
    /// This dependency ended unsuccessfully, so the job can never start.
    Doomed(JobId),
}

fn dependency_status(tx: &dyn StoreTx, job: &Job) -> Result<DependencyStatus> {
    let mut status = DependencyStatus::Satisfied;

    for dep_id in &job.dependencies {
        let Some(dep) = tx.load_job(*dep_id)? else {
            warn!(job_id = %job.id, dep = %dep_id, "dependency missing from store");
            status = DependencyStatus::Waiting;
            continue;
        };

        match dep.state {
            JobState::Finished => {}
            state if state.is_unsuccessful() => return Ok(DependencyStatus::Doomed(dep.id)),
            _ => status = DependencyStatus::Waiting,
        }
    }

    Ok(status)
}

/// Outcome of examining one pending candidate.
enum Step {
    Exhausted,
    Claimed(Job),
    Skipped(JobId, Vec<StateChangeEvent>),
}

impl<S: JobStore> JobManager<S> {
    /// Oldest job with exactly this command and argument list.
    pub fn find_job(&self, command: &str, args: &[Value]) -> Result<Option<Job>> {
        let encoded = encode_args(args)?;
        self.store.transaction(|tx| match tx.find_job_id(command, &encoded)? {
            Some(id) => tx.load_job(id),
            None => Ok(None),
        })
    }

    pub fn get_job(&self, command: &str, args: &[Value]) -> Result<Job> {
        self.find_job(command, args)?.ok_or_else(|| {
            JobQueueError::NotFound(format!(
                "found no job for command \"{command}\" and args {}",
                Value::Array(args.to_vec())
            ))
        })
    }

    /// Return the job for `(command, args)`, creating a `Pending` one if none
    /// exists yet. Lookup and insert share one transaction.
    pub fn get_or_create(&self, command: &str, args: Vec<Value>) -> Result<Job> {
        let encoded = encode_args(&args)?;
        let now = self.clock.now();

        self.store.transaction(|tx| {
            if let Some(id) = tx.find_job_id(command, &encoded)? {
                return load_existing(tx, id);
            }
            let id = tx.insert_job(&NewJob::new(command).with_args(args), now)?;
            debug!(job_id = %id, command, "created job on lookup");
            load_existing(tx, id)
        })
    }

    pub fn get_job_by_id(&self, id: JobId) -> Result<Job> {
        self.store.transaction(|tx| load_existing(tx, id))
    }

    /// Oldest eligible pending job (by priority, then id), dependencies not
    /// considered.
    pub fn find_pending_job(&self, query: &PendingJobQuery) -> Result<Option<Job>> {
        let now = self.clock.now();
        self.store
            .transaction(|tx| match tx.find_pending_job_id(query, now)? {
                Some(id) => tx.load_job(id),
                None => Ok(None),
            })
    }

    pub fn find_startable_job(
        &self,
        worker: &str,
        excluded: &mut BTreeSet<JobId>,
    ) -> Result<Option<Job>> {
        self.find_startable_job_in(worker, excluded, &QueueFilter::default())
    }

    /// Claim the next job whose dependencies all finished.
    ///
    /// Candidates that can never start (a dependency failed, was canceled,
    /// ...) are canceled on the way, together with everything waiting on
    /// them. Candidates that are blocked, canceled or lost to another worker
    /// are added to `excluded`, so callers can keep the set across calls.
    pub fn find_startable_job_in(
        &self,
        worker: &str,
        excluded: &mut BTreeSet<JobId>,
        filter: &QueueFilter,
    ) -> Result<Option<Job>> {
        loop {
            let query = PendingJobQuery::with_filter(excluded.clone(), filter);
            let now = self.clock.now();

            let step = self.store.transaction(|tx| {
                let Some(id) = tx.find_pending_job_id(&query, now)? else {
                    return Ok(Step::Exhausted);
                };
                let candidate = load_existing(tx, id)?;

                match dependency_status(tx, &candidate)? {
                    DependencyStatus::Satisfied => match tx.claim_job(id, worker, now) {
                        Ok(()) => Ok(Step::Claimed(load_existing(tx, id)?)),
                        Err(JobQueueError::StorageConflict(_)) => {
                            debug!(job_id = %id, worker, "lost claim to another worker");
                            Ok(Step::Skipped(id, Vec::new()))
                        }
                        Err(err) => Err(err),
                    },
                    DependencyStatus::Waiting => {
                        debug!(job_id = %id, "dependencies not finished yet; skipping");
                        Ok(Step::Skipped(id, Vec::new()))
                    }
                    DependencyStatus::Doomed(dep) => {
                        info!(
                            job_id = %id,
                            dep = %dep,
                            "dependency ended unsuccessfully; canceling job"
                        );
                        let mut pass = ClosePass::new(tx, self.retry.as_ref(), now);
                        pass.close(candidate, JobState::Canceled)?;
                        Ok(Step::Skipped(id, pass.finish()))
                    }
                }
            })?;

            match step {
                Step::Exhausted => return Ok(None),
                Step::Claimed(job) => {
                    info!(job_id = %job.id, command = %job.command, worker, "claimed job");
                    self.publish(&[StateChangeEvent::new(
                        &job,
                        JobState::Pending,
                        JobState::Running,
                    )]);
                    return Ok(Some(job));
                }
                Step::Skipped(id, events) => {
                    excluded.insert(id);
                    self.publish(&events);
                }
            }
        }
    }

    /// Claim one specific job for `worker`.
    ///
    /// Fails with `InvalidTransition` when the job is not pending or its
    /// dependencies have not all finished, and with `StorageConflict` when
    /// another worker claimed it first.
    pub fn start_job(&self, id: JobId, worker: &str) -> Result<Job> {
        let now = self.clock.now();

        let job = self.store.transaction(|tx| {
            let job = load_existing(tx, id)?;
            let blocked = job.state != JobState::Pending
                || dependency_status(tx, &job)? != DependencyStatus::Satisfied;
            if blocked {
                return Err(JobQueueError::InvalidTransition {
                    job: id,
                    from: job.state,
                    to: JobState::Running,
                });
            }
            tx.claim_job(id, worker, now)?;
            load_existing(tx, id)
        })?;

        info!(job_id = %job.id, command = %job.command, worker, "started job");
        self.publish(&[StateChangeEvent::new(
            &job,
            JobState::Pending,
            JobState::Running,
        )]);
        Ok(job)
    }

    /// Oldest job with `command` that references `entity`.
    pub fn find_job_for_related_entity(
        &self,
        command: &str,
        entity: &EntityRef,
    ) -> Result<Option<Job>> {
        self.store
            .transaction(|tx| match tx.find_job_id_for_related_entity(command, entity)? {
                Some(id) => tx.load_job(id),
                None => Ok(None),
            })
    }

    /// Lazily loaded related entities of `job`.
    pub fn related_entities(&self, job: &Job) -> RelatedEntities<S> {
        RelatedEntities::new(self.store.clone(), job.id)
    }

    /// Every retry spawned from `id`, in attempt order.
    pub fn retry_jobs_of(&self, id: JobId) -> Result<Vec<Job>> {
        self.store.transaction(|tx| {
            let root = load_existing(tx, id)?;
            root.retry_jobs
                .iter()
                .map(|retry| load_existing(tx, *retry))
                .collect()
        })
    }
}
