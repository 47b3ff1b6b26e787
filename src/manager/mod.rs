// src/manager/mod.rs

//! The job manager: submission, lookup, worker selection and the
//! close/retry/cascade state machine.
//!
//! The manager owns no job objects between calls. Every operation runs in
//! its own store transaction and hands back plain [`Job`] snapshots.

pub mod close;
pub mod events;
pub mod lookup;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::dag::JobGraph;
use crate::errors::{JobQueueError, Result};
use crate::job::{Job, JobId, NewJob};
use crate::retry::{ExponentialRetryScheduler, RetryScheduler};
use crate::store::{JobStore, StoreTx};

pub use events::{ChannelSink, EventSink, StateChangeEvent, TracingSink};

pub struct JobManager<S: JobStore> {
    store: S,
    events: Arc<dyn EventSink>,
    retry: Arc<dyn RetryScheduler>,
    clock: Arc<dyn Clock>,
}

impl<S: JobStore> Clone for JobManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            events: Arc::clone(&self.events),
            retry: Arc::clone(&self.retry),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: JobStore> std::fmt::Debug for JobManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("events", &self.events)
            .field("retry", &self.retry)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<S: JobStore> JobManager<S> {
    /// Manager with logging events, exponential retry backoff and the
    /// system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            events: Arc::new(TracingSink),
            retry: Arc::new(ExponentialRetryScheduler::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events = Arc::new(sink);
        self
    }

    pub fn with_retry_scheduler(mut self, retry: impl RetryScheduler + 'static) -> Self {
        self.retry = Arc::new(retry);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Store a new `Pending` job. Every dependency must already exist.
    pub fn submit(&self, job: NewJob) -> Result<Job> {
        let now = self.clock.now();
        let stored = self.store.transaction(|tx| insert_checked(tx, &job, now))?;

        info!(
            job_id = %stored.id,
            command = %stored.command,
            queue = %stored.queue,
            deps = stored.dependencies.len(),
            "submitted job"
        );
        Ok(stored)
    }

    /// Store a batch of jobs wired together by local name, all or nothing.
    ///
    /// Jobs come back in the order they were added to the graph.
    pub fn submit_graph(&self, graph: JobGraph) -> Result<Vec<Job>> {
        let planned = graph.plan()?;
        let now = self.clock.now();

        let jobs = self.store.transaction(|tx| {
            let mut stored: Vec<Option<Job>> = vec![None; planned.nodes.len()];

            for &idx in &planned.order {
                let node = &planned.nodes[idx];
                let mut job = node.job.clone();
                for &dep in &node.after {
                    let dep_job = stored[dep].as_ref().ok_or_else(|| {
                        JobQueueError::InvalidGraph(format!(
                            "job '{}' was ordered before its dependency",
                            node.name
                        ))
                    })?;
                    job.add_dependency(dep_job.id);
                }

                let saved = insert_checked(tx, &job, now)?;
                debug!(name = %node.name, job_id = %saved.id, "stored graph job");
                stored[idx] = Some(saved);
            }

            Ok(stored.into_iter().flatten().collect::<Vec<_>>())
        })?;

        info!(count = jobs.len(), "submitted job graph");
        Ok(jobs)
    }

    pub(crate) fn publish(&self, events: &[StateChangeEvent]) {
        for event in events {
            self.events.publish(event);
        }
    }
}

pub(crate) fn load_existing(tx: &dyn StoreTx, id: JobId) -> Result<Job> {
    tx.load_job(id)?
        .ok_or_else(|| JobQueueError::NotFound(format!("job {id} does not exist")))
}

fn insert_checked(tx: &mut dyn StoreTx, job: &NewJob, now: DateTime<Utc>) -> Result<Job> {
    for dep in &job.dependencies {
        if tx.load_job(*dep)?.is_none() {
            return Err(JobQueueError::NotFound(format!(
                "dependency job {dep} does not exist"
            )));
        }
    }

    let id = tx.insert_job(job, now)?;
    load_existing(tx, id)
}
