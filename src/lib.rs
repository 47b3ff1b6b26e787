// src/lib.rs

pub mod cli;
pub mod clock;
pub mod codec;
pub mod config;
pub mod cron;
pub mod dag;
pub mod errors;
pub mod job;
pub mod logging;
pub mod manager;
pub mod retry;
pub mod store;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command, ScheduleArgs};
use crate::config::{
    ConfigFile, CronTrigger, RawConfigFile, default_config_path, load_and_validate,
};
use crate::cron::{CronRunner, RunnerOptions};
use crate::errors::JobQueueError;
use crate::job::{JobId, JobState};
use crate::manager::JobManager;
use crate::store::SqliteStore;

const DEFAULT_DATABASE: &str = "jobqueue.sqlite";

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the SQLite store and the job manager
/// - the cron runner and Ctrl-C handling (`schedule`)
/// - single-job administration (`mark-incomplete`)
pub async fn run(args: CliArgs) -> Result<ExitCode> {
    let cfg = load_config(args.config.as_deref())?;

    match &args.command {
        Command::Schedule(schedule) => run_schedule(&args, &cfg, schedule).await,
        Command::MarkIncomplete { job_id } => mark_incomplete(&args, &cfg, JobId(*job_id)),
    }
}

/// Load the config named on the command line, or `jobqueue.toml` if it
/// exists, or fall back to defaults.
fn load_config(path: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = path {
        return Ok(load_and_validate(path)?);
    }

    let default_path = default_config_path();
    if default_path.exists() {
        debug!(path = %default_path.display(), "using default config file");
        return Ok(load_and_validate(&default_path)?);
    }

    Ok(ConfigFile::try_from(RawConfigFile::default())?)
}

fn database_path(args: &CliArgs, cfg: &ConfigFile) -> PathBuf {
    args.database
        .clone()
        .or_else(|| cfg.scheduler.database.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
}

fn open_manager(args: &CliArgs, cfg: &ConfigFile) -> Result<JobManager<SqliteStore>> {
    let path = database_path(args, cfg);
    let store = SqliteStore::open(&path)?;
    Ok(JobManager::new(store))
}

fn runner_options(cfg: &ConfigFile, schedule: &ScheduleArgs) -> RunnerOptions {
    let mut options = cfg.runner_options();
    if let Some(secs) = schedule.max_runtime {
        options.max_runtime = Duration::from_secs(secs);
    }
    if let Some(secs) = schedule.min_job_interval {
        options.min_job_interval = Duration::from_secs(secs);
    }
    options
}

async fn run_schedule(
    args: &CliArgs,
    cfg: &ConfigFile,
    schedule: &ScheduleArgs,
) -> Result<ExitCode> {
    let options = runner_options(cfg, schedule);
    options.validate()?;

    if schedule.dry_run {
        print_dry_run(cfg, &options, &database_path(args, cfg));
        return Ok(ExitCode::SUCCESS);
    }

    let (interval, expression) = cfg.schedulers()?;
    let runner = CronRunner::new(open_manager(args, cfg)?)
        .with_scheduler(interval)
        .with_scheduler(expression);

    // Ctrl-C → graceful shutdown.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let summary = runner.run_until(options, shutdown).await?;
    info!(?summary, "schedule complete");
    Ok(ExitCode::SUCCESS)
}

fn mark_incomplete(args: &CliArgs, cfg: &ConfigFile, id: JobId) -> Result<ExitCode> {
    let manager = open_manager(args, cfg)?;

    match manager.get_job_by_id(id) {
        Ok(_) => {}
        Err(JobQueueError::NotFound(_)) => {
            println!("Job was not found.");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    }

    let job = manager.close_job(id, JobState::Incomplete)?;
    println!("Job {} is now {}.", job.id, job.state);
    Ok(ExitCode::SUCCESS)
}

/// Print settings and recurring commands without opening the database.
fn print_dry_run(cfg: &ConfigFile, options: &RunnerOptions, database: &Path) {
    println!("jobqueue schedule dry-run");
    println!("  database = {}", database.display());
    println!("  max_runtime = {}s", options.max_runtime.as_secs());
    println!("  min_job_interval = {}ms", options.min_job_interval.as_millis());
    println!();

    println!("recurring commands ({}):", cfg.cron.len());
    for (name, command) in cfg.cron.iter() {
        println!("  - {name}");
        match &command.trigger {
            CronTrigger::Every(every) => println!("      every: {every:?}"),
            CronTrigger::Schedule(expr) => println!("      schedule: {expr}"),
        }
        if !command.template.args.is_empty() {
            println!("      args: {:?}", command.template.args);
        }
        println!("      queue: {}", command.template.queue);
        if command.template.priority != 0 {
            println!("      priority: {}", command.template.priority);
        }
        if command.template.max_retries > 0 {
            println!("      max_retries: {}", command.template.max_retries);
        }
    }

    debug!("dry-run complete (no scheduling)");
}
