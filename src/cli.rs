// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `jobqueue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobqueue",
    version,
    about = "Persistent, dependency-aware job queue with a distributed cron scheduler.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `jobqueue.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file. Overrides `[scheduler].database`.
    #[arg(long, value_name = "PATH", global = true)]
    pub database: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBQUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the recurring-job scheduler loop.
    Schedule(ScheduleArgs),

    /// Mark a running job as incomplete.
    MarkIncomplete {
        /// Id of the job to close.
        job_id: i64,
    },
}

#[derive(Debug, Clone, Args)]
pub struct ScheduleArgs {
    /// Stop after this many seconds (runtimes above 300 s get up to 5% jitter).
    #[arg(long, value_name = "SECS")]
    pub max_runtime: Option<u64>,

    /// Minimum number of seconds between two scheduling cycles.
    #[arg(long, value_name = "SECS")]
    pub min_job_interval: Option<u64>,

    /// Validate and print the schedule, but don't touch the database.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule_flags() {
        let args = CliArgs::try_parse_from([
            "jobqueue",
            "schedule",
            "--max-runtime",
            "60",
            "--min-job-interval",
            "2",
            "--database",
            "jobs.sqlite",
        ])
        .unwrap();

        assert_eq!(args.database, Some(PathBuf::from("jobs.sqlite")));
        match args.command {
            Command::Schedule(s) => {
                assert_eq!(s.max_runtime, Some(60));
                assert_eq!(s.min_job_interval, Some(2));
                assert!(!s.dry_run);
            }
            other => panic!("expected schedule, got {other:?}"),
        }
    }

    #[test]
    fn mark_incomplete_requires_numeric_id() {
        let args = CliArgs::try_parse_from(["jobqueue", "mark-incomplete", "42"]).unwrap();
        assert!(matches!(args.command, Command::MarkIncomplete { job_id: 42 }));
        assert!(CliArgs::try_parse_from(["jobqueue", "mark-incomplete", "abc"]).is_err());
    }
}
