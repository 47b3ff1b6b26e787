// src/job/state.rs

//! Job lifecycle states and the single-job transition table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Persisted state of a job.
///
/// `Pending` and `Running` are the only non-terminal states. A retry chain
/// root stays `Running` while its retries are being attempted, so the root
/// reaches a terminal state exactly once, when the whole chain is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Finished,
    Failed,
    Terminated,
    Canceled,
    Incomplete,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Running,
        JobState::Finished,
        JobState::Failed,
        JobState::Terminated,
        JobState::Canceled,
        JobState::Incomplete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Finished => "finished",
            JobState::Failed => "failed",
            JobState::Terminated => "terminated",
            JobState::Canceled => "canceled",
            JobState::Incomplete => "incomplete",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }

    /// Terminal and not `Finished`: dependents of such a job can never start.
    pub fn is_unsuccessful(self) -> bool {
        self.is_terminal() && self != JobState::Finished
    }

    /// Whether a single job may move from `self` to `to`.
    ///
    /// - `Pending -> Running | Canceled`
    /// - `Running -> Finished | Failed | Terminated | Incomplete | Canceled`
    /// - terminal states are final.
    pub fn can_transition_to(self, to: JobState) -> bool {
        match self {
            JobState::Pending => matches!(to, JobState::Running | JobState::Canceled),
            JobState::Running => to.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("invalid job state: {s}"))
    }
}
