use std::sync::{Arc, Mutex};

use jobqueue::job::{JobId, JobState};
use jobqueue::manager::{EventSink, StateChangeEvent};

/// Event sink that keeps every published event. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StateChangeEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StateChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    /// `(job, from, to)` triples in publication order.
    pub fn transitions(&self) -> Vec<(JobId, JobState, JobState)> {
        self.events()
            .into_iter()
            .map(|e| (e.job_id, e.old_state, e.new_state))
            .collect()
    }

    pub fn events_for(&self, job: JobId) -> Vec<StateChangeEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.job_id == job)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: &StateChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
