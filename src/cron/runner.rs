// src/cron/runner.rs

//! The recurring-job loop.
//!
//! [`CronRunner::run`] is meant to be started periodically (for example by
//! the system cron) on any number of hosts at once. Each invocation runs for
//! roughly `max_runtime`, checking every `min_job_interval` which commands
//! are due, and submits a job only for the commands whose lock it wins.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::cron::{CronLock, JobScheduler, LockOutcome};
use crate::errors::{JobQueueError, Result};
use crate::job::Job;
use crate::manager::JobManager;
use crate::store::JobStore;

pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(3600);
pub const DEFAULT_MIN_JOB_INTERVAL: Duration = Duration::from_secs(5);

/// Runtimes above this get up to 5% random extra, so runners started
/// together do not all stop together.
const JITTER_THRESHOLD: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub max_runtime: Duration,
    pub min_job_interval: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_runtime: DEFAULT_MAX_RUNTIME,
            min_job_interval: DEFAULT_MIN_JOB_INTERVAL,
        }
    }
}

impl RunnerOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_runtime.is_zero() {
            return Err(JobQueueError::Configuration(
                "max runtime must be greater than zero".to_string(),
            ));
        }
        if self.min_job_interval.is_zero() {
            return Err(JobQueueError::Configuration(
                "min job interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `max_runtime`, plus a random 0..=5% when it exceeds five minutes.
    pub fn effective_max_runtime(&self) -> Duration {
        if self.max_runtime <= JITTER_THRESHOLD {
            return self.max_runtime;
        }
        let max_extra = self.max_runtime.as_secs() / 20;
        let extra = rand::thread_rng().gen_range(0..=max_extra);
        self.max_runtime + Duration::from_secs(extra)
    }
}

/// Per-run loop state: which scheduler owns each command and the
/// `last_run_at` value this runner last saw for it.
#[derive(Debug, Clone, Default)]
pub struct ScheduleContext {
    entries: BTreeMap<String, ContextEntry>,
}

#[derive(Debug, Clone)]
struct ContextEntry {
    scheduler: usize,
    last_run_at: DateTime<Utc>,
}

impl ScheduleContext {
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn last_run_at(&self, command: &str) -> Option<DateTime<Utc>> {
        self.entries.get(command).map(|e| e.last_run_at)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    /// Jobs this runner submitted.
    pub scheduled: Vec<Job>,
    /// Due commands another runner fired first.
    pub lost: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub scheduled: usize,
    pub lost: usize,
}

#[derive(Debug)]
pub struct CronRunner<S: JobStore> {
    manager: JobManager<S>,
    lock: CronLock<S>,
    schedulers: Vec<Arc<dyn JobScheduler>>,
}

impl<S: JobStore> CronRunner<S> {
    pub fn new(manager: JobManager<S>) -> Self {
        let lock = CronLock::new(manager.store().clone(), manager.clock());
        Self {
            manager,
            lock,
            schedulers: Vec::new(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl JobScheduler + 'static) -> Self {
        self.schedulers.push(Arc::new(scheduler));
        self
    }

    pub fn manager(&self) -> &JobManager<S> {
        &self.manager
    }

    /// Route every command to its scheduler and load (or create) its
    /// bookkeeping row.
    pub fn prepare(&self) -> Result<ScheduleContext> {
        let stored: BTreeMap<String, DateTime<Utc>> = self
            .lock
            .load_all()?
            .into_iter()
            .map(|row| (row.command, row.last_run_at))
            .collect();

        let mut entries = BTreeMap::new();
        for (idx, scheduler) in self.schedulers.iter().enumerate() {
            for command in scheduler.commands() {
                if entries.contains_key(&command) {
                    return Err(JobQueueError::Configuration(format!(
                        "command '{command}' is registered by more than one scheduler"
                    )));
                }
                let last_run_at = match stored.get(&command) {
                    Some(at) => *at,
                    None => self.lock.get_or_create(&command)?.last_run_at,
                };
                entries.insert(
                    command,
                    ContextEntry {
                        scheduler: idx,
                        last_run_at,
                    },
                );
            }
        }

        debug!(commands = entries.len(), "prepared schedule context");
        Ok(ScheduleContext { entries })
    }

    /// Commands due right now, without taking any lock.
    pub fn due_commands(&self, ctx: &ScheduleContext) -> Vec<String> {
        let now = self.manager.clock().now();
        ctx.entries
            .iter()
            .filter(|(command, entry)| {
                self.schedulers[entry.scheduler].should_schedule(command, entry.last_run_at, now)
            })
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Check every command once and fire the due ones this runner wins.
    pub fn run_cycle(&self, ctx: &mut ScheduleContext) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for command in self.due_commands(ctx) {
            let Some(entry) = ctx.entries.get_mut(&command) else {
                continue;
            };
            let scheduler = &self.schedulers[entry.scheduler];
            let last_seen = entry.last_run_at;

            let outcome = self.lock.acquire(&command, last_seen)?;
            entry.last_run_at = outcome.last_run_at();

            match outcome {
                LockOutcome::Acquired(_) => {
                    info!(command = %command, "scheduling command {}", command);
                    let job = scheduler.create_job(&command, last_seen)?;
                    report.scheduled.push(self.manager.submit(job)?);
                }
                LockOutcome::Lost(current) => {
                    debug!(command = %command, %current, "command fired by another runner");
                    report.lost.push(command);
                }
            }
        }

        Ok(report)
    }

    pub async fn run(&self, options: RunnerOptions) -> Result<RunSummary> {
        self.run_until(options, std::future::pending()).await
    }

    /// Like [`run`](Self::run), but stops early once `shutdown` completes.
    pub async fn run_until<F>(&self, options: RunnerOptions, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        options.validate()?;
        let mut summary = RunSummary::default();

        let mut ctx = self.prepare()?;
        if ctx.is_empty() {
            info!("no recurring commands registered; nothing to schedule");
            return Ok(summary);
        }

        let max_runtime = options.effective_max_runtime();
        info!(
            commands = ctx.entries.len(),
            max_runtime_secs = max_runtime.as_secs(),
            interval_ms = options.min_job_interval.as_millis() as u64,
            "cron runner started"
        );

        let started = Instant::now();
        tokio::pin!(shutdown);

        while started.elapsed() < max_runtime {
            let cycle_started = Instant::now();
            let report = self.run_cycle(&mut ctx)?;
            summary.cycles += 1;
            summary.scheduled += report.scheduled.len();
            summary.lost += report.lost.len();

            let pause = options
                .min_job_interval
                .saturating_sub(cycle_started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = &mut shutdown => {
                    info!("shutdown requested; stopping cron runner");
                    break;
                }
            }
        }

        info!(
            cycles = summary.cycles,
            scheduled = summary.scheduled,
            lost = summary.lost,
            "cron runner finished"
        );
        Ok(summary)
    }
}
