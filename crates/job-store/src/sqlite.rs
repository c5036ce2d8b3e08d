//! SQLite-backed job store.
//!
//! The job document is kept as JSON next to the columns the store filters on. Every
//! mutation re-reads the row inside a transaction and writes back with
//! `UPDATE ... WHERE id = ? AND status = ?`, so a concurrent writer on the same database
//! file can never be overwritten silently.

use crate::apply;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_types::{
    AgentClientMetadata, Clock, Job, JobRequest, JobSpecification, JobStatus, JobStore,
    ResolveOutcome, StatusTransition, StoreError, SystemClock,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    created_ms INTEGER NOT NULL,
    updated_ms INTEGER NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_ms);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_ms);
"#;

pub struct SqliteJobStore {
    conn: std::sync::Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    /// Open (or create) the database at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::from_connection(conn, Arc::new(SystemClock))
    }

    /// Private in-memory database; handy for tests and throwaway runs.
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn, clock)
    }

    fn from_connection(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            clock,
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Other(format!("failed to acquire lock: {}", e)))?;
        f(&mut conn)
    }

    /// Read-modify-write of one job inside a transaction.
    fn mutate<T, F>(&self, id: &str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Job) -> Result<T, StoreError>,
    {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let mut job = load(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            let observed = (job.status, job.updated.timestamp_millis());
            let before = job.clone();
            let out = f(&mut job)?;
            if job != before {
                let body = encode(&job)?;
                let changed = tx
                    .execute(
                        "UPDATE jobs SET status = ?1, updated_ms = ?2, body = ?3 \
                         WHERE id = ?4 AND status = ?5 AND updated_ms = ?6",
                        params![
                            job.status.as_str(),
                            job.updated.timestamp_millis(),
                            body,
                            id,
                            observed.0.as_str(),
                            observed.1
                        ],
                    )
                    .map_err(db_err)?;
                if changed == 0 {
                    return Err(StoreError::Unavailable(format!(
                        "job {} changed concurrently",
                        id
                    )));
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(out)
        })
    }
}

fn db_err(e: rusqlite::Error) -> StoreError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Other(e.to_string()),
    }
}

fn encode(job: &Job) -> Result<String, StoreError> {
    serde_json::to_string(job).map_err(|e| StoreError::Other(e.to_string()))
}

fn decode(body: &str) -> Result<Job, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Other(e.to_string()))
}

fn load(conn: &Connection, id: &str) -> Result<Option<Job>, StoreError> {
    let body: Option<String> = conn
        .query_row("SELECT body FROM jobs WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()
        .map_err(db_err)?;
    body.as_deref().map(decode).transpose()
}

fn status_list(statuses: &BTreeSet<JobStatus>) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(args, |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn reserve_job(&self, id: &str, request: &JobRequest) -> Result<Job, StoreError> {
        let job = Job::reserved(id, request.clone(), self.clock.now());
        let body = encode(&job)?;
        self.with_conn(|conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO jobs (id, status, created_ms, updated_ms, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        job.id,
                        job.status.as_str(),
                        job.created.timestamp_millis(),
                        job.updated.timestamp_millis(),
                        body
                    ],
                )
                .map_err(db_err)?;
            if inserted == 0 {
                return Err(StoreError::IdAlreadyExists(id.to_string()));
            }
            Ok(())
        })?;
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> Result<Job, StoreError> {
        self.with_conn(|conn| load(conn, id))?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn get_job_status(&self, id: &str) -> Result<JobStatus, StoreError> {
        let status: Option<String> = self.with_conn(|conn| {
            conn.query_row("SELECT status FROM jobs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(db_err)
        })?;
        let status = status.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        status
            .parse()
            .map_err(|e: job_types::UnknownStatus| StoreError::Other(e.to_string()))
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        transition: &StatusTransition,
    ) -> Result<JobStatus, StoreError> {
        let now = self.clock.now();
        self.mutate(id, |job| Ok(apply::transition(job, transition, now)))
    }

    async fn save_specification(
        &self,
        id: &str,
        specification: &JobSpecification,
    ) -> Result<ResolveOutcome, StoreError> {
        let now = self.clock.now();
        self.mutate(id, |job| apply::save_specification(job, specification, now))
    }

    async fn claim_job(&self, id: &str, agent: &AgentClientMetadata) -> Result<(), StoreError> {
        let now = self.clock.now();
        self.mutate(id, |job| apply::claim(job, agent, now))
    }

    async fn touch(&self, id: &str) -> Result<JobStatus, StoreError> {
        let now = self.clock.now();
        self.mutate(id, |job| Ok(apply::touch(job, now)))
    }

    async fn find_stale_active_jobs(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let sql = format!(
            "SELECT id FROM jobs WHERE status IN ({}) AND updated_ms < ?1 ORDER BY id",
            status_list(&JobStatus::active_statuses())
        );
        let threshold = updated_before.timestamp_millis();
        self.with_conn(|conn| collect_ids(conn, &sql, &[&threshold as &dyn rusqlite::ToSql]))
    }

    async fn find_jobs_created_before(
        &self,
        created_before: DateTime<Utc>,
        exclude_statuses: &BTreeSet<JobStatus>,
        batch_size: usize,
    ) -> Result<Vec<String>, StoreError> {
        let exclude = if exclude_statuses.is_empty() {
            String::new()
        } else {
            format!("AND status NOT IN ({})", status_list(exclude_statuses))
        };
        let sql = format!(
            "SELECT id FROM jobs WHERE created_ms < ?1 {} ORDER BY created_ms, id LIMIT ?2",
            exclude
        );
        let threshold = created_before.timestamp_millis();
        let limit = i64::try_from(batch_size).unwrap_or(i64::MAX);
        self.with_conn(|conn| collect_ids(conn, &sql, &[&threshold as &dyn rusqlite::ToSql, &limit]))
    }

    async fn delete_jobs(&self, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let mut deleted = 0u64;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM jobs WHERE id = ?1")
                    .map_err(db_err)?;
                for id in ids {
                    deleted += stmt.execute(params![id]).map_err(db_err)? as u64;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(deleted)
        })
    }

    async fn find_job_ids_by_status(
        &self,
        statuses: &BTreeSet<JobStatus>,
    ) -> Result<Vec<String>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id FROM jobs WHERE status IN ({}) ORDER BY id",
            status_list(statuses)
        );
        self.with_conn(|conn| collect_ids(conn, &sql, &[]))
    }
}
