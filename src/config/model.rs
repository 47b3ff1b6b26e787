// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::cron::{CronExpressionScheduler, IntervalScheduler, JobTemplate, RunnerOptions};
use crate::errors::Result;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [scheduler]
/// max_runtime = "1h"
/// min_job_interval = "5s"
/// database = "var/jobs.sqlite"
///
/// [cron."reports:daily"]
/// schedule = "0 0 6 * * *"
/// args = ["--full"]
///
/// [cron."cache:prune"]
/// every = "15m"
/// queue = "maintenance"
/// max_retries = 2
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Recurring commands, keyed by command name.
    #[serde(default)]
    pub cron: BTreeMap<String, CronCommandConfig>,
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_max_runtime")]
    pub max_runtime: String,

    #[serde(default = "default_min_job_interval")]
    pub min_job_interval: String,

    /// SQLite database file. The CLI flag wins over this.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

fn default_max_runtime() -> String {
    "1h".to_string()
}

fn default_min_job_interval() -> String {
    "5s".to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_runtime: default_max_runtime(),
            min_job_interval: default_min_job_interval(),
            database: None,
        }
    }
}

/// `[cron.<command>]` section. Exactly one of `every` / `schedule`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CronCommandConfig {
    /// Fixed interval, e.g. `"15m"`.
    #[serde(default)]
    pub every: Option<String>,

    /// Cron expression, seconds first.
    #[serde(default)]
    pub schedule: Option<String>,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub queue: Option<String>,

    #[serde(default)]
    pub priority: Option<i32>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub scheduler: SchedulerSettings,
    pub cron: BTreeMap<String, CronCommand>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub max_runtime: Duration,
    pub min_job_interval: Duration,
    pub database: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CronCommand {
    pub template: JobTemplate,
    pub trigger: CronTrigger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronTrigger {
    Every(Duration),
    Schedule(String),
}

impl ConfigFile {
    /// Only used by `TryFrom<RawConfigFile>` after validation.
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSettings,
        cron: BTreeMap<String, CronCommand>,
    ) -> Self {
        Self { scheduler, cron }
    }

    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            max_runtime: self.scheduler.max_runtime,
            min_job_interval: self.scheduler.min_job_interval,
        }
    }

    /// Split the recurring commands into the two scheduler kinds.
    pub fn schedulers(&self) -> Result<(IntervalScheduler, CronExpressionScheduler)> {
        let mut interval = IntervalScheduler::new();
        let mut expression = CronExpressionScheduler::new();

        for command in self.cron.values() {
            match &command.trigger {
                CronTrigger::Every(every) => {
                    interval = interval.every(command.template.clone(), *every);
                }
                CronTrigger::Schedule(expr) => {
                    expression = expression.add(command.template.clone(), expr)?;
                }
            }
        }

        Ok((interval, expression))
    }
}
