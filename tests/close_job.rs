// tests/close_job.rs

use std::time::Duration;

use chrono::TimeDelta;
use jobqueue::clock::Clock;
use jobqueue::errors::JobQueueError;
use jobqueue::job::{JobState, NewJob};
use jobqueue::retry::ExponentialRetryScheduler;
use jobqueue::store::MemoryStore;
use jobqueue_test_utils::{TestQueue, init_tracing};

fn backoff_queue() -> TestQueue {
    TestQueue::with_retry(MemoryStore::new(), ExponentialRetryScheduler::default())
}

#[test]
fn failed_root_spawns_delayed_retries_until_success() {
    init_tracing();
    let q = backoff_queue();

    let root = q.submit(NewJob::new("import").with_max_retries(2));
    q.start(root.id);

    let after_first = q.close(root.id, JobState::Failed);
    assert_eq!(after_first.state, JobState::Running);
    assert_eq!(after_first.retry_jobs.len(), 1);
    let first_retry = q.job(after_first.retry_jobs[0]);
    assert_eq!(first_retry.state, JobState::Pending);
    assert_eq!(first_retry.original_job, Some(root.id));
    assert_eq!(first_retry.command, "import");
    assert_eq!(
        first_retry.execute_after,
        Some(q.clock.now() + TimeDelta::seconds(1))
    );

    // not eligible before the backoff elapsed
    assert!(q.next_startable().is_none());
    q.advance(Duration::from_secs(1));
    assert_eq!(q.next_startable().map(|j| j.id), Some(first_retry.id));

    let after_second = q.close(first_retry.id, JobState::Failed);
    assert_eq!(after_second.id, first_retry.id);
    assert_eq!(after_second.state, JobState::Failed);

    let root_now = q.job(root.id);
    assert_eq!(root_now.state, JobState::Running);
    assert_eq!(root_now.retry_jobs.len(), 2);
    let second_retry = q.job(root_now.retry_jobs[1]);
    assert_eq!(
        second_retry.execute_after,
        Some(q.clock.now() + TimeDelta::seconds(5))
    );

    q.advance(Duration::from_secs(5));
    assert_eq!(q.next_startable().map(|j| j.id), Some(second_retry.id));
    q.close(second_retry.id, JobState::Finished);

    assert_eq!(q.state(root.id), JobState::Finished);
    let chain: Vec<_> = q
        .manager
        .retry_jobs_of(root.id)
        .unwrap()
        .into_iter()
        .map(|j| (j.id, j.state))
        .collect();
    assert_eq!(
        chain,
        vec![
            (first_retry.id, JobState::Failed),
            (second_retry.id, JobState::Finished),
        ]
    );
}

#[test]
fn exhausted_retries_fail_root_and_cancel_dependents() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("fetch").with_max_retries(1));
    let parse = q.submit(NewJob::new("parse").depends_on(root.id));
    let index = q.submit(NewJob::new("index").depends_on(parse.id));
    q.start(root.id);

    let root_after = q.close(root.id, JobState::Failed);
    let retry = root_after.retry_jobs[0];
    assert_eq!(q.state(parse.id), JobState::Pending);

    assert_eq!(q.next_startable().map(|j| j.id), Some(retry));
    q.events.clear();
    q.close(retry, JobState::Failed);

    assert_eq!(q.state(root.id), JobState::Failed);
    assert_eq!(q.state(parse.id), JobState::Canceled);
    assert_eq!(q.state(index.id), JobState::Canceled);
    assert_eq!(q.job(root.id).retry_jobs, vec![retry]);

    assert_eq!(
        q.events.transitions(),
        vec![
            (retry, JobState::Running, JobState::Failed),
            (root.id, JobState::Running, JobState::Failed),
            (parse.id, JobState::Pending, JobState::Canceled),
            (index.id, JobState::Pending, JobState::Canceled),
        ]
    );
}

#[test]
fn retry_spawn_is_reported_as_root_failure() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("sync").with_max_retries(3));
    q.start(root.id);
    q.events.clear();
    q.close(root.id, JobState::Failed);

    assert_eq!(
        q.events.transitions(),
        vec![(root.id, JobState::Running, JobState::Failed)]
    );
    assert_eq!(q.state(root.id), JobState::Running);
}

#[test]
fn second_failure_while_retry_pending_is_rejected() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("sync").with_max_retries(3));
    q.start(root.id);
    let retry = q.close(root.id, JobState::Failed).retry_jobs[0];
    q.events.clear();

    assert!(matches!(
        q.manager.close_job(root.id, JobState::Failed),
        Err(JobQueueError::InvalidTransition {
            from: JobState::Running,
            to: JobState::Failed,
            ..
        })
    ));
    assert_eq!(q.job(root.id).retry_jobs, vec![retry]);
    assert_eq!(q.state(retry), JobState::Pending);
    assert!(q.events.is_empty());

    // once the attempt closes, the next failure goes through the retry
    q.start(retry);
    q.close(retry, JobState::Failed);
    let root_after = q.job(root.id);
    assert_eq!(root_after.state, JobState::Running);
    assert_eq!(root_after.retry_jobs.len(), 2);
}

#[test]
fn terminated_retry_chain_ends_root_terminated() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("sync").with_max_retries(2));
    q.start(root.id);
    let first = q.close(root.id, JobState::Failed).retry_jobs[0];
    q.start(first);
    q.close(first, JobState::Failed);
    let second = q.job(root.id).retry_jobs[1];
    q.start(second);

    q.close(second, JobState::Terminated);

    let root_after = q.job(root.id);
    assert_eq!(root_after.retry_jobs, vec![first, second]);
    assert_eq!(root_after.state, JobState::Terminated);
    assert_eq!(q.state(first), JobState::Failed);
    assert_eq!(q.state(second), JobState::Terminated);
}

#[test]
fn only_failure_spawns_retries() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("sync").with_max_retries(3));
    q.start(root.id);
    let closed = q.close(root.id, JobState::Terminated);

    assert_eq!(closed.state, JobState::Terminated);
    assert!(closed.retry_jobs.is_empty());
}

#[test]
fn retry_outcome_is_forwarded_to_root() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("sync").with_max_retries(2));
    let downstream = q.submit(NewJob::new("report").depends_on(root.id));
    q.start(root.id);
    let retry = q.close(root.id, JobState::Failed).retry_jobs[0];
    q.start(retry);

    q.close(retry, JobState::Incomplete);
    assert_eq!(q.state(retry), JobState::Incomplete);
    assert_eq!(q.state(root.id), JobState::Incomplete);
    assert_eq!(q.state(downstream.id), JobState::Canceled);
}

#[test]
fn canceling_root_cancels_pending_retries() {
    let q = backoff_queue();

    let root = q.submit(NewJob::new("sync").with_max_retries(2));
    q.start(root.id);
    let retry = q.close(root.id, JobState::Failed).retry_jobs[0];

    q.close(root.id, JobState::Canceled);
    assert_eq!(q.state(root.id), JobState::Canceled);
    assert_eq!(q.state(retry), JobState::Canceled);
}

#[test]
fn finishing_job_leaves_dependents_pending() {
    let q = TestQueue::new();

    let a = q.submit(NewJob::new("a"));
    let b = q.submit(NewJob::new("b").depends_on(a.id));
    q.start(a.id);

    let closed = q.close(a.id, JobState::Finished);
    assert_eq!(closed.state, JobState::Finished);
    assert!(closed.closed_at.is_some());
    assert_eq!(q.state(b.id), JobState::Pending);
}

#[test]
fn cascade_skips_jobs_already_running_or_closed() {
    let q = TestQueue::new();

    let a = q.submit(NewJob::new("a"));
    let b = q.submit(NewJob::new("b").depends_on(a.id));
    let c = q.submit(NewJob::new("c").depends_on(a.id));
    q.start(a.id);
    q.close(c.id, JobState::Canceled);

    q.close(a.id, JobState::Terminated);
    assert_eq!(q.state(b.id), JobState::Canceled);
    assert_eq!(q.state(c.id), JobState::Canceled);
    assert_eq!(q.events.events_for(c.id).len(), 1);
}

#[test]
fn terminated_job_reports_its_canceled_dependent() {
    let q = TestQueue::new();

    let a = q.submit(NewJob::new("a"));
    let b = q.submit(NewJob::new("b").depends_on(a.id));
    q.start(a.id);
    q.events.clear();

    q.close(a.id, JobState::Terminated);
    assert_eq!(
        q.events.transitions(),
        vec![
            (a.id, JobState::Running, JobState::Terminated),
            (b.id, JobState::Pending, JobState::Canceled),
        ]
    );
}

#[test]
fn diamond_dependents_are_canceled_once() {
    let q = TestQueue::new();

    let root = q.submit(NewJob::new("root"));
    let left = q.submit(NewJob::new("left").depends_on(root.id));
    let right = q.submit(NewJob::new("right").depends_on(root.id));
    let join = q.submit(
        NewJob::new("join")
            .depends_on(left.id)
            .depends_on(right.id),
    );
    q.start(root.id);
    q.close(root.id, JobState::Failed);

    for id in [left.id, right.id, join.id] {
        assert_eq!(q.state(id), JobState::Canceled);
    }
    assert_eq!(q.events.events_for(join.id).len(), 1);
}

#[test]
fn illegal_closes_are_rejected_without_changes() {
    let q = TestQueue::new();

    let pending = q.submit(NewJob::new("a"));
    assert!(matches!(
        q.manager.close_job(pending.id, JobState::Finished),
        Err(JobQueueError::InvalidTransition {
            from: JobState::Pending,
            to: JobState::Finished,
            ..
        })
    ));

    q.start(pending.id);
    assert!(matches!(
        q.manager.close_job(pending.id, JobState::Pending),
        Err(JobQueueError::InvalidTransition { .. })
    ));

    q.close(pending.id, JobState::Finished);
    q.events.clear();
    assert!(matches!(
        q.manager.close_job(pending.id, JobState::Failed),
        Err(JobQueueError::InvalidTransition {
            from: JobState::Finished,
            ..
        })
    ));
    assert_eq!(q.state(pending.id), JobState::Finished);
    assert!(q.events.is_empty());
}

#[test]
fn pending_job_can_be_canceled_directly() {
    let q = TestQueue::new();

    let a = q.submit(NewJob::new("a"));
    let b = q.submit(NewJob::new("b").depends_on(a.id));

    q.close(a.id, JobState::Canceled);
    assert_eq!(q.state(a.id), JobState::Canceled);
    assert_eq!(q.state(b.id), JobState::Canceled);
}
