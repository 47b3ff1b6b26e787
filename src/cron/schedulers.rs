// src/cron/schedulers.rs

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;
use serde_json::Value;

use crate::cron::JobScheduler;
use crate::errors::{JobQueueError, Result};
use crate::job::{DEFAULT_QUEUE, NewJob, PRIORITY_DEFAULT};

/// Job produced each time a recurring command fires.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    pub command: String,
    pub args: Vec<Value>,
    pub queue: String,
    pub priority: i32,
    pub max_retries: u32,
}

impl JobTemplate {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            queue: DEFAULT_QUEUE.to_string(),
            priority: PRIORITY_DEFAULT,
            max_retries: 0,
        }
    }

    pub fn to_new_job(&self) -> NewJob {
        NewJob::new(self.command.clone())
            .with_args(self.args.clone())
            .with_queue(self.queue.clone())
            .with_priority(self.priority)
            .with_max_retries(self.max_retries)
    }
}

fn unknown_command(command: &str) -> JobQueueError {
    JobQueueError::NotFound(format!("no recurring command named '{command}'"))
}

/// Fires a command once at least `every` has passed since its last run.
#[derive(Debug, Clone, Default)]
pub struct IntervalScheduler {
    entries: BTreeMap<String, (TimeDelta, JobTemplate)>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn every(mut self, template: JobTemplate, every: Duration) -> Self {
        let every = TimeDelta::from_std(every).unwrap_or(TimeDelta::MAX);
        self.entries
            .insert(template.command.clone(), (every, template));
        self
    }
}

impl JobScheduler for IntervalScheduler {
    fn commands(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn should_schedule(
        &self,
        command: &str,
        last_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.entries
            .get(command)
            .is_some_and(|(every, _)| now.signed_duration_since(last_run_at) >= *every)
    }

    fn create_job(&self, command: &str, _last_run_at: DateTime<Utc>) -> Result<NewJob> {
        self.entries
            .get(command)
            .map(|(_, template)| template.to_new_job())
            .ok_or_else(|| unknown_command(command))
    }
}

/// Fires a command when its cron expression had an occurrence after the
/// last run. Expressions use the `cron` crate syntax, seconds first
/// (`"0 */15 * * * *"`).
#[derive(Debug, Clone, Default)]
pub struct CronExpressionScheduler {
    entries: BTreeMap<String, (Schedule, JobTemplate)>,
}

impl CronExpressionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, template: JobTemplate, expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression).map_err(|e| {
            JobQueueError::Configuration(format!(
                "invalid cron expression '{}' for command '{}': {}",
                expression, template.command, e
            ))
        })?;
        self.entries
            .insert(template.command.clone(), (schedule, template));
        Ok(self)
    }
}

impl JobScheduler for CronExpressionScheduler {
    fn commands(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    fn should_schedule(
        &self,
        command: &str,
        last_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        self.entries.get(command).is_some_and(|(schedule, _)| {
            schedule
                .after(&last_run_at)
                .next()
                .is_some_and(|next| next <= now)
        })
    }

    fn create_job(&self, command: &str, _last_run_at: DateTime<Utc>) -> Result<NewJob> {
        self.entries
            .get(command)
            .map(|(_, template)| template.to_new_job())
            .ok_or_else(|| unknown_command(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn interval_fires_after_period() {
        let scheduler =
            IntervalScheduler::new().every(JobTemplate::new("cleanup"), Duration::from_secs(60));

        assert_eq!(scheduler.commands(), vec!["cleanup".to_string()]);
        assert!(!scheduler.should_schedule("cleanup", at(10, 0, 0), at(10, 0, 59)));
        assert!(scheduler.should_schedule("cleanup", at(10, 0, 0), at(10, 1, 0)));
        assert!(!scheduler.should_schedule("unknown", at(10, 0, 0), at(11, 0, 0)));
    }

    #[test]
    fn cron_expression_fires_on_next_occurrence() {
        let scheduler = CronExpressionScheduler::new()
            .add(JobTemplate::new("report"), "0 */15 * * * *")
            .unwrap();

        assert!(!scheduler.should_schedule("report", at(10, 0, 0), at(10, 14, 59)));
        assert!(scheduler.should_schedule("report", at(10, 0, 0), at(10, 15, 0)));
    }

    #[test]
    fn invalid_expression_is_a_configuration_error() {
        let err = CronExpressionScheduler::new()
            .add(JobTemplate::new("report"), "every tuesday")
            .unwrap_err();
        assert!(matches!(err, JobQueueError::Configuration(_)));
    }

    #[test]
    fn template_carries_job_options() {
        let mut template = JobTemplate::new("sync");
        template.queue = "slow".to_string();
        template.max_retries = 3;
        let scheduler = IntervalScheduler::new().every(template, Duration::from_secs(5));

        let job = scheduler.create_job("sync", at(0, 0, 0)).unwrap();
        assert_eq!(job.queue, "slow");
        assert_eq!(job.max_retries, 3);
        assert!(matches!(
            scheduler.create_job("other", at(0, 0, 0)),
            Err(JobQueueError::NotFound(_))
        ));
    }
}
