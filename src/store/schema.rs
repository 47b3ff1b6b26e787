// src/store/schema.rs

//! SQLite schema. Tables are created if missing; there are no migrations.
//!
//! Timestamps are stored as INTEGER microseconds since the epoch so they
//! compare exactly in the cron compare-and-swap.

use rusqlite::Connection;

use crate::errors::Result;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    command TEXT NOT NULL,
    args TEXT NOT NULL,
    state TEXT NOT NULL,
    queue TEXT NOT NULL,
    priority INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    original_job_id INTEGER REFERENCES jobs(id),
    worker_name TEXT,
    created_at INTEGER NOT NULL,
    execute_after INTEGER,
    started_at INTEGER,
    closed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_command ON jobs(command, args);
CREATE INDEX IF NOT EXISTS idx_jobs_pending ON jobs(state, priority, id);
CREATE INDEX IF NOT EXISTS idx_jobs_original ON jobs(original_job_id);

-- source waits for dest
CREATE TABLE IF NOT EXISTS job_dependencies (
    source_job_id INTEGER NOT NULL REFERENCES jobs(id),
    dest_job_id INTEGER NOT NULL REFERENCES jobs(id),
    PRIMARY KEY (source_job_id, dest_job_id)
);

CREATE INDEX IF NOT EXISTS idx_job_dependencies_dest ON job_dependencies(dest_job_id);

CREATE TABLE IF NOT EXISTS job_related_entities (
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    position INTEGER NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    PRIMARY KEY (job_id, entity_kind, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_job_related_entities_ref
    ON job_related_entities(entity_kind, entity_id);

CREATE TABLE IF NOT EXISTS cron_jobs (
    command TEXT PRIMARY KEY,
    last_run_at INTEGER NOT NULL
);
"#;
