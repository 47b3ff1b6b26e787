// src/job/mod.rs

//! Job records.
//!
//! - [`NewJob`] is a job that has not been written yet. Dependencies and
//!   related entities can only be attached here.
//! - [`Job`] is a snapshot of a stored job. It is read-only apart from the
//!   state transition used by the manager.
//! - [`state`] holds [`JobState`] and the transition table.
//! - [`related`] holds entity references and their lazy resolution.

pub mod related;
pub mod state;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{JobQueueError, Result};

pub use related::{EntityRef, EntityResolver, RelatedEntities, ResolverRegistry};
pub use state::JobState;

pub const DEFAULT_QUEUE: &str = "default";

pub const PRIORITY_HIGH: i32 = -5;
pub const PRIORITY_DEFAULT: i32 = 0;
pub const PRIORITY_LOW: i32 = 5;

/// Store-assigned job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub command: String,
    pub args: Vec<Value>,
    pub queue: String,
    pub priority: i32,
    pub max_retries: u32,
    pub dependencies: BTreeSet<JobId>,
    pub related_entities: Vec<EntityRef>,
    pub execute_after: Option<DateTime<Utc>>,
    pub(crate) original_job: Option<JobId>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            queue: DEFAULT_QUEUE.to_string(),
            priority: PRIORITY_DEFAULT,
            max_retries: 0,
            dependencies: BTreeSet::new(),
            related_entities: Vec::new(),
            execute_after: None,
            original_job: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_execute_after(mut self, at: DateTime<Utc>) -> Self {
        self.execute_after = Some(at);
        self
    }

    pub fn depends_on(mut self, job: JobId) -> Self {
        self.dependencies.insert(job);
        self
    }

    pub fn add_dependency(&mut self, job: JobId) {
        self.dependencies.insert(job);
    }

    /// Attach a reference to an external domain object. Duplicates are
    /// ignored; the set is frozen once the job is stored.
    pub fn with_related_entity(mut self, entity: EntityRef) -> Self {
        if !self.related_entities.contains(&entity) {
            self.related_entities.push(entity);
        }
        self
    }

    /// Build the next attempt of a chain root.
    pub(crate) fn retry_of(root: &Job, execute_after: DateTime<Utc>) -> Self {
        Self {
            command: root.command.clone(),
            args: root.args.clone(),
            queue: root.queue.clone(),
            priority: root.priority,
            max_retries: 0,
            dependencies: root.dependencies.clone(),
            related_entities: Vec::new(),
            execute_after: Some(execute_after),
            original_job: Some(root.id),
        }
    }
}

/// Snapshot of a stored job.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub args: Vec<Value>,
    pub state: JobState,
    pub queue: String,
    pub priority: i32,
    pub max_retries: u32,
    pub dependencies: BTreeSet<JobId>,
    /// Retries spawned from this job, in attempt order.
    pub retry_jobs: Vec<JobId>,
    pub original_job: Option<JobId>,
    pub worker_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub execute_after: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_retry_job(&self) -> bool {
        self.original_job.is_some()
    }

    /// A chain root may spawn another attempt while it has retries left.
    pub fn is_retry_allowed(&self) -> bool {
        !self.is_retry_job() && (self.retry_jobs.len() as u64) < u64::from(self.max_retries)
    }

    /// Apply a single-job transition, stamping `started_at` / `closed_at`.
    pub(crate) fn transition_to(&mut self, to: JobState, now: DateTime<Utc>) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(JobQueueError::InvalidTransition {
                job: self.id,
                from: self.state,
                to,
            });
        }

        if to == JobState::Running {
            self.started_at = Some(now);
        } else if to.is_terminal() {
            self.closed_at = Some(now);
        }
        self.state = to;
        Ok(())
    }
}
