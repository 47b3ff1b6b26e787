use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use jobqueue::clock::mock::ManualClock;
use jobqueue::job::{Job, JobId, JobState, NewJob};
use jobqueue::manager::JobManager;
use jobqueue::retry::{NoDelayRetryScheduler, RetryScheduler};
use jobqueue::store::{JobStore, MemoryStore};

use crate::recording_sink::RecordingSink;

pub const WORKER: &str = "worker-1";

/// Fixed start time for manual clocks.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A manager wired to a manual clock and a recording sink.
///
/// Retries are immediate unless a different scheduler is given.
pub struct TestQueue<S: JobStore = MemoryStore> {
    pub manager: JobManager<S>,
    pub clock: ManualClock,
    pub events: RecordingSink,
}

impl TestQueue<MemoryStore> {
    pub fn new() -> Self {
        Self::on(MemoryStore::new())
    }
}

impl Default for TestQueue<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: JobStore> TestQueue<S> {
    pub fn on(store: S) -> Self {
        Self::with_retry(store, NoDelayRetryScheduler)
    }

    pub fn with_retry(store: S, retry: impl RetryScheduler + 'static) -> Self {
        let clock = ManualClock::new(epoch());
        let events = RecordingSink::new();
        let manager = JobManager::new(store)
            .with_clock(clock.clone())
            .with_event_sink(events.clone())
            .with_retry_scheduler(retry);
        Self {
            manager,
            clock,
            events,
        }
    }

    /// A second manager on the same store and clock, like another worker
    /// process.
    pub fn peer(&self) -> JobManager<S> {
        JobManager::new(self.manager.store().clone())
            .with_clock(self.clock.clone())
            .with_event_sink(self.events.clone())
            .with_retry_scheduler(NoDelayRetryScheduler)
    }

    pub fn submit(&self, job: NewJob) -> Job {
        self.manager.submit(job).expect("submit failed")
    }

    pub fn start(&self, id: JobId) -> Job {
        self.manager.start_job(id, WORKER).expect("start failed")
    }

    pub fn close(&self, id: JobId, state: JobState) -> Job {
        self.manager.close_job(id, state).expect("close failed")
    }

    pub fn job(&self, id: JobId) -> Job {
        self.manager.get_job_by_id(id).expect("job lookup failed")
    }

    pub fn state(&self, id: JobId) -> JobState {
        self.job(id).state
    }

    /// Claim the next startable job with a fresh exclusion set.
    pub fn next_startable(&self) -> Option<Job> {
        let mut excluded = BTreeSet::new();
        self.manager
            .find_startable_job(WORKER, &mut excluded)
            .expect("find_startable_job failed")
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}
