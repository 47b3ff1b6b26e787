// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::codec::encode_args;
use crate::cron::CronJob;
use crate::dag::DependencyIndex;
use crate::errors::{JobQueueError, Result};
use crate::job::{EntityRef, Job, JobId, JobState, NewJob};
use crate::store::{JobStore, PendingJobQuery, StoreTx};

/// In-process store. Clones share the same tables, so several managers (or
/// several cron runners) built on clones behave like processes sharing a
/// database. Transactions hold one lock and roll back through an undo log.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    jobs: BTreeMap<JobId, StoredJob>,
    dependencies: DependencyIndex,
    related: BTreeMap<JobId, Vec<EntityRef>>,
    cron: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    encoded_args: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T>,
    {
        let mut tables = self.tables.lock();

        let mut tx = MemoryTx {
            tables: &mut *tables,
            undo: Vec::new(),
        };
        let result = f(&mut tx);
        if result.is_err() {
            tx.rollback();
        }
        result
    }
}

/// Prior value of one piece of state touched inside a transaction.
#[derive(Debug)]
enum Undo {
    LastId(i64),
    Job(JobId, Option<StoredJob>),
    Inserted(JobId),
    Cron(String, Option<DateTime<Utc>>),
}

/// Writes go straight to the tables; every write first records how to
/// revert it, so a failed transaction costs only what it touched.
struct MemoryTx<'a> {
    tables: &'a mut Tables,
    undo: Vec<Undo>,
}

impl MemoryTx<'_> {
    fn stored_mut(&mut self, id: JobId) -> Result<&mut StoredJob> {
        let stored = self
            .tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| JobQueueError::NotFound(format!("job {id} does not exist")))?;
        self.undo.push(Undo::Job(id, Some(stored.clone())));
        Ok(stored)
    }

    fn rollback(&mut self) {
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::LastId(id) => self.tables.last_id = id,
                Undo::Job(id, Some(previous)) => {
                    self.tables.jobs.insert(id, previous);
                }
                Undo::Job(id, None) => {
                    self.tables.jobs.remove(&id);
                }
                Undo::Inserted(id) => {
                    self.tables.dependencies.remove(id);
                    self.tables.related.remove(&id);
                }
                Undo::Cron(command, Some(previous)) => {
                    self.tables.cron.insert(command, previous);
                }
                Undo::Cron(command, None) => {
                    self.tables.cron.remove(&command);
                }
            }
        }
    }
}

impl StoreTx for MemoryTx<'_> {
    fn insert_job(&mut self, new: &NewJob, created_at: DateTime<Utc>) -> Result<JobId> {
        let encoded_args = encode_args(&new.args)?;

        if let Some(original) = new.original_job {
            if !self.tables.jobs.contains_key(&original) {
                return Err(JobQueueError::NotFound(format!("job {original} does not exist")));
            }
        }

        self.undo.push(Undo::LastId(self.tables.last_id));
        self.tables.last_id += 1;
        let id = JobId(self.tables.last_id);

        let job = Job {
            id,
            command: new.command.clone(),
            args: new.args.clone(),
            state: JobState::Pending,
            queue: new.queue.clone(),
            priority: new.priority,
            max_retries: new.max_retries,
            dependencies: new.dependencies.clone(),
            retry_jobs: Vec::new(),
            original_job: new.original_job,
            worker_name: None,
            created_at,
            execute_after: new.execute_after,
            started_at: None,
            closed_at: None,
        };

        if let Some(original) = new.original_job {
            self.stored_mut(original)?.job.retry_jobs.push(id);
        }
        self.undo.push(Undo::Inserted(id));
        self.tables.dependencies.insert(id, &new.dependencies);
        if !new.related_entities.is_empty() {
            self.tables
                .related
                .insert(id, new.related_entities.clone());
        }
        self.undo.push(Undo::Job(id, None));
        self.tables.jobs.insert(id, StoredJob { job, encoded_args });

        Ok(id)
    }

    fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.tables.jobs.get(&id).map(|stored| {
            let mut job = stored.job.clone();
            job.dependencies = self.tables.dependencies.dependencies_of(id);
            job
        }))
    }

    fn update_job(&mut self, job: &Job) -> Result<()> {
        let stored = self.stored_mut(job.id)?;
        stored.job.state = job.state;
        stored.job.worker_name = job.worker_name.clone();
        stored.job.started_at = job.started_at;
        stored.job.closed_at = job.closed_at;
        Ok(())
    }

    fn find_job_id(&self, command: &str, encoded_args: &str) -> Result<Option<JobId>> {
        Ok(self
            .tables
            .jobs
            .values()
            .find(|s| s.job.command == command && s.encoded_args == encoded_args)
            .map(|s| s.job.id))
    }

    fn find_pending_job_id(
        &self,
        query: &PendingJobQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        Ok(self
            .tables
            .jobs
            .values()
            .map(|s| &s.job)
            .filter(|job| job.state == JobState::Pending && job.worker_name.is_none())
            .filter(|job| job.execute_after.is_none_or(|at| at <= now))
            .filter(|job| query.admits(job.id, &job.queue))
            .min_by_key(|job| (job.priority, job.id))
            .map(|job| job.id))
    }

    fn dependents_of(&self, id: JobId) -> Result<Vec<JobId>> {
        Ok(self.tables.dependencies.dependents_of(id))
    }

    fn claim_job(&mut self, id: JobId, worker: &str, now: DateTime<Utc>) -> Result<()> {
        let stored = self.stored_mut(id)?;
        if stored.job.state != JobState::Pending || stored.job.worker_name.is_some() {
            return Err(JobQueueError::StorageConflict(format!(
                "job {id} is no longer claimable"
            )));
        }
        stored.job.state = JobState::Running;
        stored.job.worker_name = Some(worker.to_string());
        stored.job.started_at = Some(now);
        Ok(())
    }

    fn find_job_id_for_related_entity(
        &self,
        command: &str,
        entity: &EntityRef,
    ) -> Result<Option<JobId>> {
        Ok(self
            .tables
            .related
            .iter()
            .filter(|(_, entities)| entities.contains(entity))
            .map(|(id, _)| *id)
            .find(|id| {
                self.tables
                    .jobs
                    .get(id)
                    .is_some_and(|s| s.job.command == command)
            }))
    }

    fn related_entities(&self, id: JobId) -> Result<Vec<EntityRef>> {
        Ok(self.tables.related.get(&id).cloned().unwrap_or_default())
    }

    fn load_cron_jobs(&self) -> Result<Vec<CronJob>> {
        Ok(self
            .tables
            .cron
            .iter()
            .map(|(command, last_run_at)| CronJob {
                command: command.clone(),
                last_run_at: *last_run_at,
            })
            .collect())
    }

    fn load_cron_job(&self, command: &str) -> Result<Option<CronJob>> {
        Ok(self.tables.cron.get(command).map(|last_run_at| CronJob {
            command: command.to_string(),
            last_run_at: *last_run_at,
        }))
    }

    fn insert_cron_job(&mut self, job: &CronJob) -> Result<bool> {
        if self.tables.cron.contains_key(&job.command) {
            return Ok(false);
        }
        self.undo.push(Undo::Cron(job.command.clone(), None));
        self.tables.cron.insert(job.command.clone(), job.last_run_at);
        Ok(true)
    }

    fn compare_and_swap_last_run(
        &mut self,
        command: &str,
        expected: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> Result<()> {
        match self.tables.cron.get_mut(command) {
            Some(current) if *current == expected => {
                self.undo.push(Undo::Cron(command.to_string(), Some(*current)));
                *current = new;
                Ok(())
            }
            _ => Err(JobQueueError::StorageConflict(format!(
                "last run of '{command}' changed concurrently"
            ))),
        }
    }
}
