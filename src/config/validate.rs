// src/config/validate.rs

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::config::model::{
    ConfigFile, CronCommand, CronCommandConfig, CronTrigger, RawConfigFile, SchedulerSettings,
};
use crate::cron::JobTemplate;
use crate::errors::{JobQueueError, Result};
use crate::job::DEFAULT_QUEUE;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = JobQueueError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let scheduler = validate_scheduler(&raw)?;
        let cron = validate_cron_commands(raw.cron)?;
        Ok(ConfigFile::new_unchecked(scheduler, cron))
    }
}

fn validate_scheduler(cfg: &RawConfigFile) -> Result<SchedulerSettings> {
    let max_runtime = positive_duration("[scheduler].max_runtime", &cfg.scheduler.max_runtime)?;
    let min_job_interval = positive_duration(
        "[scheduler].min_job_interval",
        &cfg.scheduler.min_job_interval,
    )?;

    Ok(SchedulerSettings {
        max_runtime,
        min_job_interval,
        database: cfg.scheduler.database.clone(),
    })
}

fn validate_cron_commands(
    raw: BTreeMap<String, CronCommandConfig>,
) -> Result<BTreeMap<String, CronCommand>> {
    let mut commands = BTreeMap::new();

    for (name, entry) in raw {
        if name.trim().is_empty() {
            return Err(JobQueueError::Configuration(
                "[cron] entries must have a non-empty command name".to_string(),
            ));
        }

        let trigger = match (&entry.every, &entry.schedule) {
            (Some(every), None) => {
                CronTrigger::Every(positive_duration(&format!("[cron.{name}].every"), every)?)
            }
            (None, Some(expr)) => {
                cron::Schedule::from_str(expr).map_err(|e| {
                    JobQueueError::Configuration(format!(
                        "[cron.{name}].schedule '{expr}' is not a valid cron expression: {e}"
                    ))
                })?;
                CronTrigger::Schedule(expr.clone())
            }
            (Some(_), Some(_)) => {
                return Err(JobQueueError::Configuration(format!(
                    "[cron.{name}] sets both `every` and `schedule`; pick one"
                )));
            }
            (None, None) => {
                return Err(JobQueueError::Configuration(format!(
                    "[cron.{name}] needs either `every` or `schedule`"
                )));
            }
        };

        let template = JobTemplate {
            command: name.clone(),
            args: entry.args,
            queue: entry.queue.unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            priority: entry.priority.unwrap_or_default(),
            max_retries: entry.max_retries.unwrap_or_default(),
        };

        commands.insert(name, CronCommand { template, trigger });
    }

    Ok(commands)
}

fn positive_duration(field: &str, value: &str) -> Result<Duration> {
    let duration = parse_duration(value)
        .map_err(|e| JobQueueError::Configuration(format!("{field}: {e}")))?;
    if duration.is_zero() {
        return Err(JobQueueError::Configuration(format!(
            "{field} must be greater than zero (got '{value}')"
        )));
    }
    Ok(duration)
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{}'; expected ms, s, m, or h",
                unit
            ));
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 5s "), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    }

    #[test]
    fn rejects_malformed_durations() {
        for bad in ["", "10", "s", "5d", "-5s", "99999999999999999999h"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
