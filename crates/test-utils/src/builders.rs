#![allow(dead_code)]

use std::collections::BTreeMap;

use jobqueue::config::{ConfigFile, CronCommandConfig, RawConfigFile, SchedulerSection};
use serde_json::Value;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                scheduler: SchedulerSection::default(),
                cron: BTreeMap::new(),
            },
        }
    }

    pub fn with_command(mut self, name: &str, command: CronCommandConfig) -> Self {
        self.config.cron.insert(name.to_string(), command);
        self
    }

    pub fn max_runtime(mut self, value: &str) -> Self {
        self.config.scheduler.max_runtime = value.to_string();
        self
    }

    pub fn min_job_interval(mut self, value: &str) -> Self {
        self.config.scheduler.min_job_interval = value.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `CronCommandConfig`.
pub struct CronCommandBuilder {
    command: CronCommandConfig,
}

impl CronCommandBuilder {
    pub fn every(interval: &str) -> Self {
        Self {
            command: CronCommandConfig {
                every: Some(interval.to_string()),
                ..CronCommandConfig::default()
            },
        }
    }

    pub fn schedule(expr: &str) -> Self {
        Self {
            command: CronCommandConfig {
                schedule: Some(expr.to_string()),
                ..CronCommandConfig::default()
            },
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.command.args.push(value);
        self
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.command.queue = Some(queue.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.command.priority = Some(priority);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.command.max_retries = Some(retries);
        self
    }

    pub fn build(self) -> CronCommandConfig {
        self.command
    }
}
