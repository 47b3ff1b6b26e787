// src/store/mod.rs

//! Transactional storage for jobs and cron bookkeeping.
//!
//! Everything the manager and the cron lock do goes through
//! [`JobStore::transaction`]: the closure receives a [`StoreTx`], and the
//! work is committed when it returns `Ok` and discarded when it returns
//! `Err`. Two backends are shipped:
//!
//! - [`MemoryStore`]: process-local tables behind a mutex.
//! - [`SqliteStore`]: one SQLite database, shareable between processes.

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::cron::CronJob;
use crate::errors::{JobQueueError, Result};
use crate::job::{EntityRef, Job, JobId, NewJob};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub trait JobStore: Clone + Send + Sync + 'static {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T>;
}

/// Operations available inside one transaction.
pub trait StoreTx {
    /// Insert a `Pending` job and return its new id. Dependencies are not
    /// checked for existence here.
    fn insert_job(&mut self, job: &NewJob, created_at: DateTime<Utc>) -> Result<JobId>;

    fn load_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Persist `state`, `worker_name`, `started_at` and `closed_at`.
    fn update_job(&mut self, job: &Job) -> Result<()>;

    /// Lowest id with exactly this command and encoded argument list.
    fn find_job_id(&self, command: &str, encoded_args: &str) -> Result<Option<JobId>>;

    fn find_pending_job_id(
        &self,
        query: &PendingJobQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<JobId>>;

    /// Jobs that list `id` among their dependencies, ascending.
    fn dependents_of(&self, id: JobId) -> Result<Vec<JobId>>;

    /// Move an unclaimed `Pending` job to `Running` for `worker`.
    ///
    /// Returns [`JobQueueError::StorageConflict`] when the job was no longer
    /// pending or was already claimed.
    fn claim_job(&mut self, id: JobId, worker: &str, now: DateTime<Utc>) -> Result<()>;

    fn find_job_id_for_related_entity(
        &self,
        command: &str,
        entity: &EntityRef,
    ) -> Result<Option<JobId>>;

    fn related_entities(&self, id: JobId) -> Result<Vec<EntityRef>>;

    fn load_cron_jobs(&self) -> Result<Vec<CronJob>>;

    fn load_cron_job(&self, command: &str) -> Result<Option<CronJob>>;

    /// Insert the row unless one exists for the command. Returns whether a
    /// row was written.
    fn insert_cron_job(&mut self, job: &CronJob) -> Result<bool>;

    /// Set `last_run_at = new` only if it currently equals `expected`.
    ///
    /// Returns [`JobQueueError::StorageConflict`] when no row matched.
    fn compare_and_swap_last_run(
        &mut self,
        command: &str,
        expected: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> Result<()>;
}

/// Queue restrictions for pending-job selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilter {
    pub excluded_queues: Vec<String>,
    /// When non-empty, only these queues are eligible.
    pub restricted_queues: Vec<String>,
}

impl QueueFilter {
    pub fn only<I, Q>(queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        Self {
            excluded_queues: Vec::new(),
            restricted_queues: queues.into_iter().map(Into::into).collect(),
        }
    }

    pub fn excluding<I, Q>(queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        Self {
            excluded_queues: queues.into_iter().map(Into::into).collect(),
            restricted_queues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingJobQuery {
    pub excluded_ids: BTreeSet<JobId>,
    pub excluded_queues: Vec<String>,
    pub restricted_queues: Vec<String>,
}

impl PendingJobQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(excluded_ids: BTreeSet<JobId>, filter: &QueueFilter) -> Self {
        Self {
            excluded_ids,
            excluded_queues: filter.excluded_queues.clone(),
            restricted_queues: filter.restricted_queues.clone(),
        }
    }

    pub fn excluding_id(mut self, id: JobId) -> Self {
        self.excluded_ids.insert(id);
        self
    }

    /// Whether a pending, unclaimed, due job passes the id and queue filters.
    pub fn admits(&self, id: JobId, queue: &str) -> bool {
        if self.excluded_ids.contains(&id) {
            return false;
        }
        if self.excluded_queues.iter().any(|q| q == queue) {
            return false;
        }
        self.restricted_queues.is_empty() || self.restricted_queues.iter().any(|q| q == queue)
    }
}

pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        JobQueueError::CorruptRecord(format!("timestamp out of range: {micros}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_applies_id_and_queue_filters() {
        let query = PendingJobQuery::with_filter(
            BTreeSet::from([JobId(3)]),
            &QueueFilter::excluding(["slow"]),
        );
        assert!(query.admits(JobId(1), "default"));
        assert!(!query.admits(JobId(3), "default"));
        assert!(!query.admits(JobId(1), "slow"));

        let only = PendingJobQuery::with_filter(BTreeSet::new(), &QueueFilter::only(["mail"]));
        assert!(only.admits(JobId(1), "mail"));
        assert!(!only.admits(JobId(1), "default"));
    }

    #[test]
    fn micros_round_trip() {
        let at = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(at)).unwrap(), at);
    }
}
