// src/store/sqlite.rs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params, params_from_iter};
use tracing::debug;

use crate::codec::{decode_args, encode_args};
use crate::cron::CronJob;
use crate::errors::{JobQueueError, Result};
use crate::job::{EntityRef, Job, JobId, JobState, NewJob};
use crate::store::schema::init_schema;
use crate::store::{JobStore, PendingJobQuery, StoreTx, from_micros, to_micros};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on excluded ids bound into one pending-job query.
const MAX_BOUND_IDS: usize = 500;

const JOB_COLUMNS: &str = "id, command, args, state, queue, priority, max_retries, \
     original_job_id, worker_name, created_at, execute_after, started_at, closed_at";

/// SQLite-backed store. Every transaction is `BEGIN IMMEDIATE`, so writers
/// from several processes serialize on the database lock.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a database file and make sure the tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        debug!(path = %path.display(), "opened sqlite job store");
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl JobStore for SqliteStore {
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn StoreTx) -> Result<T>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Dropping `tx` without commit rolls back.
        let value = f(&mut SqliteTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }
}

struct SqliteTx<'a> {
    conn: &'a Connection,
}

struct JobRow {
    id: i64,
    command: String,
    args: String,
    state: String,
    queue: String,
    priority: i32,
    max_retries: u32,
    original_job_id: Option<i64>,
    worker_name: Option<String>,
    created_at: i64,
    execute_after: Option<i64>,
    started_at: Option<i64>,
    closed_at: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            command: row.get(1)?,
            args: row.get(2)?,
            state: row.get(3)?,
            queue: row.get(4)?,
            priority: row.get(5)?,
            max_retries: row.get(6)?,
            original_job_id: row.get(7)?,
            worker_name: row.get(8)?,
            created_at: row.get(9)?,
            execute_after: row.get(10)?,
            started_at: row.get(11)?,
            closed_at: row.get(12)?,
        })
    }
}

fn opt_micros(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(to_micros)
}

fn opt_from_micros(value: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    value.map(from_micros).transpose()
}

impl SqliteTx<'_> {
    fn ids(&self, sql: &str, param: i64) -> Result<Vec<JobId>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map([param], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(JobId))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn job_from_row(&self, row: JobRow) -> Result<Job> {
        let id = JobId(row.id);
        let state: JobState = row.state.parse().map_err(|e: String| {
            JobQueueError::CorruptRecord(format!("job {id}: {e}"))
        })?;

        Ok(Job {
            id,
            args: decode_args(&row.args)?,
            command: row.command,
            state,
            queue: row.queue,
            priority: row.priority,
            max_retries: row.max_retries,
            dependencies: self
                .ids(
                    "SELECT dest_job_id FROM job_dependencies WHERE source_job_id = ?1 \
                     ORDER BY dest_job_id",
                    row.id,
                )?
                .into_iter()
                .collect(),
            retry_jobs: self.ids(
                "SELECT id FROM jobs WHERE original_job_id = ?1 ORDER BY id",
                row.id,
            )?,
            original_job: row.original_job_id.map(JobId),
            worker_name: row.worker_name,
            created_at: from_micros(row.created_at)?,
            execute_after: opt_from_micros(row.execute_after)?,
            started_at: opt_from_micros(row.started_at)?,
            closed_at: opt_from_micros(row.closed_at)?,
        })
    }

    fn cron_job(row: &Row<'_>) -> rusqlite::Result<(String, i64)> {
        Ok((row.get(0)?, row.get(1)?))
    }
}

impl StoreTx for SqliteTx<'_> {
    fn insert_job(&mut self, job: &NewJob, created_at: DateTime<Utc>) -> Result<JobId> {
        self.conn.execute(
            "INSERT INTO jobs (command, args, state, queue, priority, max_retries, \
             original_job_id, created_at, execute_after) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.command,
                encode_args(&job.args)?,
                JobState::Pending.as_str(),
                job.queue,
                job.priority,
                job.max_retries,
                job.original_job.map(|id| id.0),
                to_micros(created_at),
                opt_micros(job.execute_after),
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        for dep in &job.dependencies {
            self.conn.execute(
                "INSERT INTO job_dependencies (source_job_id, dest_job_id) VALUES (?1, ?2)",
                params![id, dep.0],
            )?;
        }
        for (position, entity) in job.related_entities.iter().enumerate() {
            self.conn.execute(
                "INSERT INTO job_related_entities (job_id, position, entity_kind, entity_id) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, position as i64, entity.kind, entity.id],
            )?;
        }

        Ok(JobId(id))
    }

    fn load_job(&self, id: JobId) -> Result<Option<Job>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                [id.0],
                JobRow::from_row,
            )
            .optional()?;

        row.map(|row| self.job_from_row(row)).transpose()
    }

    fn update_job(&mut self, job: &Job) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET state = ?1, worker_name = ?2, started_at = ?3, closed_at = ?4 \
             WHERE id = ?5",
            params![
                job.state.as_str(),
                job.worker_name,
                opt_micros(job.started_at),
                opt_micros(job.closed_at),
                job.id.0,
            ],
        )?;
        if changed == 0 {
            return Err(JobQueueError::NotFound(format!("job {} does not exist", job.id)));
        }
        Ok(())
    }

    fn find_job_id(&self, command: &str, encoded_args: &str) -> Result<Option<JobId>> {
        let id = self
            .conn
            .query_row(
                "SELECT id FROM jobs WHERE command = ?1 AND args = ?2 ORDER BY id LIMIT 1",
                params![command, encoded_args],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(JobId))
    }

    fn find_pending_job_id(
        &self,
        query: &PendingJobQuery,
        now: DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        let mut sql = String::from(
            "SELECT id FROM jobs WHERE state = ? AND worker_name IS NULL \
             AND (execute_after IS NULL OR execute_after <= ?)",
        );
        let mut values: Vec<SqlValue> = vec![
            SqlValue::Text(JobState::Pending.as_str().to_string()),
            SqlValue::Integer(to_micros(now)),
        ];

        let mut push_list = |clause: &str, items: Vec<SqlValue>| {
            if items.is_empty() {
                return;
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            sql.push_str(&format!(" AND {clause} ({placeholders})"));
            values.extend(items);
        };

        // a long-running worker can exclude more ids than SQLite binds
        let bind_ids = query.excluded_ids.len() <= MAX_BOUND_IDS;
        if bind_ids {
            push_list(
                "id NOT IN",
                query
                    .excluded_ids
                    .iter()
                    .map(|id| SqlValue::Integer(id.0))
                    .collect(),
            );
        }
        push_list(
            "queue NOT IN",
            query
                .excluded_queues
                .iter()
                .map(|q| SqlValue::Text(q.clone()))
                .collect(),
        );
        push_list(
            "queue IN",
            query
                .restricted_queues
                .iter()
                .map(|q| SqlValue::Text(q.clone()))
                .collect(),
        );

        sql.push_str(" ORDER BY priority ASC, id ASC");

        if bind_ids {
            sql.push_str(" LIMIT 1");
            let id = self
                .conn
                .query_row(&sql, params_from_iter(values.iter()), |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            return Ok(id.map(JobId));
        }

        debug!(
            excluded = query.excluded_ids.len(),
            "filtering excluded ids outside the query"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values.iter()))?;
        while let Some(row) = rows.next()? {
            let id = JobId(row.get(0)?);
            if !query.excluded_ids.contains(&id) {
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    fn dependents_of(&self, id: JobId) -> Result<Vec<JobId>> {
        self.ids(
            "SELECT source_job_id FROM job_dependencies WHERE dest_job_id = ?1 \
             ORDER BY source_job_id",
            id.0,
        )
    }

    fn claim_job(&mut self, id: JobId, worker: &str, now: DateTime<Utc>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET state = ?1, worker_name = ?2, started_at = ?3 \
             WHERE id = ?4 AND state = ?5 AND worker_name IS NULL",
            params![
                JobState::Running.as_str(),
                worker,
                to_micros(now),
                id.0,
                JobState::Pending.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(JobQueueError::StorageConflict(format!(
                "job {id} is no longer claimable"
            )));
        }
        Ok(())
    }

    fn find_job_id_for_related_entity(
        &self,
        command: &str,
        entity: &EntityRef,
    ) -> Result<Option<JobId>> {
        let id = self
            .conn
            .query_row(
                "SELECT j.id FROM jobs j \
                 JOIN job_related_entities r ON r.job_id = j.id \
                 WHERE j.command = ?1 AND r.entity_kind = ?2 AND r.entity_id = ?3 \
                 ORDER BY j.id LIMIT 1",
                params![command, entity.kind, entity.id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(id.map(JobId))
    }

    fn related_entities(&self, id: JobId) -> Result<Vec<EntityRef>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_kind, entity_id FROM job_related_entities \
             WHERE job_id = ?1 ORDER BY position",
        )?;
        let entities = stmt
            .query_map([id.0], |row| {
                Ok(EntityRef {
                    kind: row.get(0)?,
                    id: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    fn load_cron_jobs(&self) -> Result<Vec<CronJob>> {
        let mut stmt = self
            .conn
            .prepare("SELECT command, last_run_at FROM cron_jobs ORDER BY command")?;
        let rows = stmt
            .query_map([], Self::cron_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(command, last_run_at)| {
                Ok(CronJob {
                    command,
                    last_run_at: from_micros(last_run_at)?,
                })
            })
            .collect()
    }

    fn load_cron_job(&self, command: &str) -> Result<Option<CronJob>> {
        let row = self
            .conn
            .query_row(
                "SELECT command, last_run_at FROM cron_jobs WHERE command = ?1",
                [command],
                Self::cron_job,
            )
            .optional()?;

        row.map(|(command, last_run_at)| {
            Ok(CronJob {
                command,
                last_run_at: from_micros(last_run_at)?,
            })
        })
        .transpose()
    }

    fn insert_cron_job(&mut self, job: &CronJob) -> Result<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO cron_jobs (command, last_run_at) VALUES (?1, ?2)",
            params![job.command, to_micros(job.last_run_at)],
        )?;
        Ok(changed > 0)
    }

    fn compare_and_swap_last_run(
        &mut self,
        command: &str,
        expected: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE cron_jobs SET last_run_at = ?1 WHERE command = ?2 AND last_run_at = ?3",
            params![to_micros(new), command, to_micros(expected)],
        )?;
        if changed == 0 {
            return Err(JobQueueError::StorageConflict(format!(
                "last run of '{command}' changed concurrently"
            )));
        }
        Ok(())
    }
}
