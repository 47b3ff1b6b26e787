// src/manager/events.rs

//! State-change notifications.
//!
//! The manager publishes one [`StateChangeEvent`] per transition, after the
//! transaction that made it has committed.

use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::job::{Job, JobId, JobState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub job_id: JobId,
    pub command: String,
    pub old_state: JobState,
    pub new_state: JobState,
}

impl StateChangeEvent {
    pub fn new(job: &Job, old_state: JobState, new_state: JobState) -> Self {
        Self {
            job_id: job.id,
            command: job.command.clone(),
            old_state,
            new_state,
        }
    }
}

pub trait EventSink: Send + Sync + Debug {
    fn publish(&self, event: &StateChangeEvent);
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn publish(&self, event: &StateChangeEvent) {
        (**self).publish(event)
    }
}

/// Logs every transition at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &StateChangeEvent) {
        info!(
            job_id = %event.job_id,
            command = %event.command,
            from = %event.old_state,
            to = %event.new_state,
            "job state changed"
        );
    }
}

/// Forwards events into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateChangeEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: &StateChangeEvent) {
        if self.tx.send(event.clone()).is_err() {
            debug!(job_id = %event.job_id, "event receiver dropped; discarding event");
        }
    }
}
