// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

use crate::job::{JobId, JobState};

#[derive(Error, Debug)]
pub enum JobQueueError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: JobId,
        from: JobState,
        to: JobState,
    },

    #[error("Codec error: {0}")]
    Codec(String),

    /// A conditional update matched no row. Callers that race on purpose
    /// (cron lock, worker claims) treat this as "somebody else won".
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid job graph: {0}")]
    InvalidGraph(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reading config file at {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing TOML config from {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, JobQueueError>;
