// tests/config_errors.rs

use std::io::Write;
use std::time::Duration;

use jobqueue::config::{ConfigFile, CronTrigger, load_and_validate};
use jobqueue::cron::JobScheduler;
use jobqueue::errors::JobQueueError;
use jobqueue_test_utils::builders::{ConfigFileBuilder, CronCommandBuilder};
use serde_json::json;
use tempfile::NamedTempFile;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_config_loads_and_validates() {
    let file = config_file(
        r#"
[scheduler]
max_runtime = "10m"
min_job_interval = "500ms"
database = "var/jobs.sqlite"

[cron."reports:daily"]
schedule = "0 0 6 * * *"
args = ["--full", 3]

[cron."cache:prune"]
every = "15m"
queue = "maintenance"
priority = 5
max_retries = 2
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.scheduler.max_runtime, Duration::from_secs(600));
    assert_eq!(cfg.scheduler.min_job_interval, Duration::from_millis(500));
    assert_eq!(
        cfg.scheduler.database.as_deref(),
        Some(std::path::Path::new("var/jobs.sqlite"))
    );

    let prune = &cfg.cron["cache:prune"];
    assert_eq!(prune.trigger, CronTrigger::Every(Duration::from_secs(900)));
    assert_eq!(prune.template.queue, "maintenance");
    assert_eq!(prune.template.priority, 5);
    assert_eq!(prune.template.max_retries, 2);

    let daily = &cfg.cron["reports:daily"];
    assert_eq!(daily.trigger, CronTrigger::Schedule("0 0 6 * * *".to_string()));
    assert_eq!(daily.template.args, vec![json!("--full"), json!(3)]);
    assert_eq!(daily.template.queue, "default");

    let (interval, expression) = cfg.schedulers().unwrap();
    assert_eq!(interval.commands(), vec!["cache:prune".to_string()]);
    assert_eq!(expression.commands(), vec!["reports:daily".to_string()]);
}

#[test]
fn empty_file_uses_defaults() {
    let file = config_file("");
    let cfg = load_and_validate(file.path()).unwrap();

    assert_eq!(cfg.scheduler.max_runtime, Duration::from_secs(3600));
    assert_eq!(cfg.scheduler.min_job_interval, Duration::from_secs(5));
    assert!(cfg.scheduler.database.is_none());
    assert!(cfg.cron.is_empty());
}

#[test]
fn command_without_trigger_returns_config_error() {
    let file = config_file(
        r#"
[cron.lonely]
queue = "x"
"#,
    );

    match load_and_validate(file.path()) {
        Err(JobQueueError::Configuration(msg)) => {
            assert!(msg.contains("needs either `every` or `schedule`"));
            assert!(msg.contains("lonely"));
        }
        Err(e) => panic!("Expected Configuration error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn command_with_both_triggers_returns_config_error() {
    let file = config_file(
        r#"
[cron.greedy]
every = "1m"
schedule = "0 * * * * *"
"#,
    );

    match load_and_validate(file.path()) {
        Err(JobQueueError::Configuration(msg)) => {
            assert!(msg.contains("sets both `every` and `schedule`"));
        }
        Err(e) => panic!("Expected Configuration error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn bad_cron_expression_returns_config_error() {
    let file = config_file(
        r#"
[cron.broken]
schedule = "every tuesday"
"#,
    );

    match load_and_validate(file.path()) {
        Err(JobQueueError::Configuration(msg)) => {
            assert!(msg.contains("is not a valid cron expression"));
            assert!(msg.contains("every tuesday"));
        }
        Err(e) => panic!("Expected Configuration error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn zero_durations_are_rejected() {
    let file = config_file(
        r#"
[scheduler]
min_job_interval = "0s"
"#,
    );

    match load_and_validate(file.path()) {
        Err(JobQueueError::Configuration(msg)) => {
            assert!(msg.contains("min_job_interval"));
            assert!(msg.contains("must be greater than zero"));
        }
        Err(e) => panic!("Expected Configuration error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn malformed_toml_returns_toml_error() {
    let file = config_file("[scheduler\nmax_runtime = 1h");

    match load_and_validate(file.path()) {
        Err(err @ JobQueueError::Toml { .. }) => {
            let msg = err.to_string();
            assert!(msg.contains("parsing TOML config"));
            assert!(msg.contains(&file.path().display().to_string()));
        }
        Err(e) => panic!("Expected Toml error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn missing_file_returns_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    match load_and_validate(&missing) {
        Err(JobQueueError::ConfigRead { path, source }) => {
            assert_eq!(path, missing);
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        Err(e) => panic!("Expected ConfigRead error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn builder_config_feeds_runner_options() {
    let cfg = ConfigFileBuilder::new()
        .max_runtime("2m")
        .min_job_interval("1s")
        .with_command(
            "mail:flush",
            CronCommandBuilder::every("30s")
                .arg(json!(true))
                .queue("mail")
                .priority(-5)
                .max_retries(1)
                .build(),
        )
        .build();

    let options = cfg.runner_options();
    assert_eq!(options.max_runtime, Duration::from_secs(120));
    assert_eq!(options.min_job_interval, Duration::from_secs(1));

    let template = &cfg.cron["mail:flush"].template;
    let job = template.to_new_job();
    assert_eq!(job.command, "mail:flush");
    assert_eq!(job.args, vec![json!(true)]);
    assert_eq!(job.queue, "mail");
    assert_eq!(job.priority, -5);
    assert_eq!(job.max_retries, 1);
}

#[test]
fn builder_raw_config_rejects_bad_duration() {
    let raw = ConfigFileBuilder::new()
        .with_command("tick", CronCommandBuilder::every("5 parsecs").build())
        .raw();

    match ConfigFile::try_from(raw) {
        Err(JobQueueError::Configuration(msg)) => assert!(msg.contains("[cron.tick].every")),
        other => panic!("expected Configuration error, got {other:?}"),
    }
}
