// tests/sqlite_store.rs

use std::collections::BTreeSet;
use std::time::Duration;

use jobqueue::clock::Clock;
use jobqueue::cron::{CronLock, CronRunner, IntervalScheduler, JobTemplate, LockOutcome};
use jobqueue::job::{EntityRef, JobId, JobState, NewJob};
use jobqueue::store::{PendingJobQuery, QueueFilter, SqliteStore};
use jobqueue_test_utils::fixtures::WORKER;
use jobqueue_test_utils::{TestQueue, init_tracing};
use serde_json::json;

fn sqlite_queue() -> TestQueue<SqliteStore> {
    TestQueue::on(SqliteStore::in_memory().unwrap())
}

#[test]
fn jobs_round_trip_through_sqlite() {
    init_tracing();
    let q = sqlite_queue();

    let dep = q.submit(NewJob::new("dep"));
    let args = vec![json!(false), json!({"nested": [1, null]}), json!("b:0;")];
    let job = q.submit(
        NewJob::new("convert")
            .with_args(args.clone())
            .with_queue("media")
            .with_priority(-5)
            .with_max_retries(3)
            .depends_on(dep.id)
            .with_related_entity(EntityRef::new("video", "42")),
    );

    let loaded = q.job(job.id);
    assert_eq!(loaded, job);
    assert_eq!(loaded.args, args);
    assert_eq!(loaded.dependencies, BTreeSet::from([dep.id]));
    assert_eq!(loaded.state, JobState::Pending);
    assert_eq!(loaded.created_at, q.clock.now());

    let found = q.manager.find_job("convert", &args).unwrap();
    assert_eq!(found.map(|j| j.id), Some(job.id));
    assert_eq!(
        q.manager.related_entities(&job).get().unwrap(),
        &[EntityRef::new("video", "42")]
    );
}

#[test]
fn retry_and_cascade_behave_like_memory_store() {
    let q = sqlite_queue();

    let root = q.submit(NewJob::new("fetch").with_max_retries(1));
    let child = q.submit(NewJob::new("parse").depends_on(root.id));
    q.start(root.id);

    let root_after = q.close(root.id, JobState::Failed);
    assert_eq!(root_after.state, JobState::Running);
    let retry = root_after.retry_jobs[0];
    assert_eq!(q.job(retry).original_job, Some(root.id));

    assert_eq!(q.next_startable().map(|j| j.id), Some(retry));
    q.close(retry, JobState::Failed);

    assert_eq!(q.state(root.id), JobState::Failed);
    assert_eq!(q.state(child.id), JobState::Canceled);
    assert!(q.job(child.id).closed_at.is_some());
}

#[test]
fn pending_search_survives_very_large_excluded_sets() {
    let q = sqlite_queue();

    let first = q.submit(NewJob::new("a"));
    let second = q.submit(NewJob::new("b"));
    let third = q.submit(NewJob::new("c"));

    // far more ids than SQLite accepts as bound parameters
    let mut excluded: BTreeSet<JobId> = (1_000..41_000).map(JobId).collect();
    excluded.insert(first.id);

    let query = PendingJobQuery::with_filter(excluded.clone(), &QueueFilter::default());
    assert_eq!(
        q.manager.find_pending_job(&query).unwrap().map(|j| j.id),
        Some(second.id)
    );

    excluded.insert(second.id);
    let claimed = q
        .manager
        .find_startable_job(WORKER, &mut excluded)
        .unwrap()
        .expect("third job is startable");
    assert_eq!(claimed.id, third.id);

    excluded.insert(third.id);
    let query = PendingJobQuery::with_filter(excluded, &QueueFilter::default());
    assert!(q.manager.find_pending_job(&query).unwrap().is_none());
}

#[test]
fn claims_are_exclusive_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");

    let a = TestQueue::on(SqliteStore::open(&path).unwrap());
    let b = TestQueue::on(SqliteStore::open(&path).unwrap());

    let job = a.submit(NewJob::new("only"));
    let claimed = b.next_startable().expect("b sees a's job");
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.worker_name.as_deref(), Some(WORKER));

    let mut excluded = BTreeSet::new();
    assert!(
        a.manager
            .find_startable_job("worker-2", &mut excluded)
            .unwrap()
            .is_none()
    );
}

#[test]
fn cron_compare_and_swap_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cron.sqlite");

    let q = TestQueue::on(SqliteStore::open(&path).unwrap());
    let other = SqliteStore::open(&path).unwrap();

    let lock_a = CronLock::new(q.manager.store().clone(), q.manager.clock());
    let lock_b = CronLock::new(other, q.manager.clock());

    let seen = lock_a.get_or_create("digest").unwrap().last_run_at;
    assert_eq!(lock_b.get_or_create("digest").unwrap().last_run_at, seen);

    q.advance(Duration::from_secs(90));
    let won = lock_b.acquire("digest", seen).unwrap();
    assert_eq!(won, LockOutcome::Acquired(q.clock.now()));

    let lost = lock_a.acquire("digest", seen).unwrap();
    assert_eq!(lost, LockOutcome::Lost(q.clock.now()));
}

#[test]
fn runners_on_separate_connections_fire_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cron.sqlite");

    let q = TestQueue::on(SqliteStore::open(&path).unwrap());
    let peer = TestQueue::on(SqliteStore::open(&path).unwrap());
    peer.clock.set(q.clock.now());

    let scheduler =
        || IntervalScheduler::new().every(JobTemplate::new("ping"), Duration::from_secs(10));
    let first = CronRunner::new(q.manager.clone()).with_scheduler(scheduler());
    let second = CronRunner::new(peer.manager.clone()).with_scheduler(scheduler());

    let mut ctx_a = first.prepare().unwrap();
    let mut ctx_b = second.prepare().unwrap();

    q.advance(Duration::from_secs(10));
    peer.advance(Duration::from_secs(10));

    let fired = first.run_cycle(&mut ctx_a).unwrap().scheduled.len()
        + second.run_cycle(&mut ctx_b).unwrap().scheduled.len();
    assert_eq!(fired, 1);
}
