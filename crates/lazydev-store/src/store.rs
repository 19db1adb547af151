use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use lazydev_core::types::{
    CommitPlan, CommitRecord, CommitStatus, JobDetail, JobStatus, JobSummary,
};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Transaction};
use tracing::{debug, info, instrument, warn};

use crate::db::init_db;
use crate::error::{Result, StoreError};

const JOB_COLUMNS: &str = "id, repo, archive_key, status, total_commits, completed_commits,
     cancel_requested, created_at, started_at, finished_at, error";

const COMMIT_COLUMNS: &str = "idx, files, message, delay_mins, status, error, committed_at";

/// Outcome of [`JobStore::request_cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelRequest {
    /// Intent recorded; the runner will observe it at its next decision point.
    Recorded,
    /// A previous request is still waiting to be observed.
    AlreadyRequested,
    /// The job had already finished; nothing changed.
    AlreadyTerminal,
}

/// What a firing needs to hand to the commit executor.
#[derive(Debug, Clone)]
pub struct CommitTarget {
    pub job_id: String,
    pub repo: String,
    pub archive_key: String,
    pub total_commits: u32,
    pub record: CommitRecord,
}

/// Outcome of [`JobStore::begin_commit`].
#[derive(Debug, Clone)]
pub enum BeginCommit {
    /// The record is now `in_progress` and must be executed.
    Started(CommitTarget),
    /// A cancellation is pending; the job must be cancelled instead.
    CancelRequested,
    /// The job or record is not in the expected state (double fire, terminal job).
    Stale,
}

/// Outcome of [`JobStore::complete_commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteCommit {
    /// More records remain; the next one is `index` with `delay_mins`.
    Next { index: u32, delay_mins: u32 },
    /// That was the last record; the job is now `completed`.
    JobCompleted,
    /// The record was not `in_progress`; nothing changed.
    Stale,
}

/// Thread-safe store for jobs and their commit records.
///
/// Wraps a single SQLite connection in a `Mutex`. Every mutation runs inside
/// one transaction while the lock is held, which serializes concurrent
/// attempts to mutate the same job.
pub struct JobStore {
    db: Mutex<Connection>,
}

impl JobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open an in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist a new job plus one `pending` record per plan entry, in plan order.
    #[instrument(skip(self, plan), fields(repo = %plan.repo, commits = plan.commits.len()))]
    pub fn create_job(&self, id: &str, plan: &CommitPlan, archive_key: &str) -> Result<JobDetail> {
        let now = Utc::now();
        let total = plan.commits.len() as u32;

        let mut db = self.lock();
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, repo, archive_key, status, total_commits, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![id, plan.repo, archive_key, total, now],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO commits (job_id, idx, files, message, delay_mins, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending')",
            )?;
            for (idx, entry) in plan.commits.iter().enumerate() {
                let files = serde_json::to_string(&entry.files).map_err(|e| {
                    StoreError::Database(rusqlite::Error::ToSqlConversionFailure(e.into()))
                })?;
                stmt.execute(params![id, idx as u32, files, entry.message, entry.delay_mins])?;
            }
        }
        let detail = load_detail(&tx, id)?.ok_or_else(|| StoreError::JobNotFound {
            id: id.to_string(),
        })?;
        tx.commit()?;

        info!(job_id = %id, "job created");
        Ok(detail)
    }

    /// Full snapshot of one job, `None` if it does not exist.
    pub fn get_job(&self, id: &str) -> Result<Option<JobDetail>> {
        let db = self.lock();
        load_detail(&db, id)
    }

    /// Job summaries, newest first.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let db = self.lock();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_summary)?
            .map(|r| r.map(|(summary, _)| summary))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Every job that is not yet terminal, oldest first. Used for restart recovery.
    pub fn list_unfinished(&self) -> Result<Vec<JobDetail>> {
        let db = self.lock();
        let ids: Vec<String> = {
            let mut stmt = db.prepare(
                "SELECT id FROM jobs WHERE status IN ('pending', 'in_progress')
                 ORDER BY created_at, rowid",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<_>>()?;
            ids
        };
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(detail) = load_detail(&db, &id)? {
                jobs.push(detail);
            }
        }
        Ok(jobs)
    }

    /// Record the intent to cancel. Idempotent; a terminal job is left untouched.
    #[instrument(skip(self))]
    pub fn request_cancel(&self, id: &str) -> Result<CancelRequest> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let (status, requested) = job_state(&tx, id)?;

        let outcome = if status.is_terminal() {
            CancelRequest::AlreadyTerminal
        } else if requested {
            CancelRequest::AlreadyRequested
        } else {
            tx.execute(
                "UPDATE jobs SET cancel_requested = 1
                 WHERE id = ?1 AND cancel_requested = 0
                   AND status IN ('pending', 'in_progress')",
                params![id],
            )?;
            CancelRequest::Recorded
        };
        tx.commit()?;

        debug!(?outcome, "cancel requested");
        Ok(outcome)
    }

    /// Whether a cancellation is waiting to be observed on a non-terminal job.
    pub fn cancel_requested(&self, id: &str) -> Result<bool> {
        let db = self.lock();
        let (status, requested) = job_state(&db, id)?;
        Ok(requested && !status.is_terminal())
    }

    /// Move record `index` from `pending` to `in_progress`, starting the job on
    /// its first firing.
    ///
    /// Refuses (returns [`BeginCommit::Stale`]) unless every earlier record is
    /// `completed`, no record is in flight, and the job is not terminal.
    #[instrument(skip(self))]
    pub fn begin_commit(&self, id: &str, index: u32) -> Result<BeginCommit> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let (status, requested) = job_state(&tx, id)?;

        if status.is_terminal() {
            return Ok(BeginCommit::Stale);
        }
        if requested {
            return Ok(BeginCommit::CancelRequested);
        }

        let blocking: i64 = tx.query_row(
            "SELECT COUNT(*) FROM commits
             WHERE job_id = ?1
               AND ((idx < ?2 AND status != 'completed') OR status = 'in_progress')",
            params![id, index],
            |row| row.get(0),
        )?;
        if blocking > 0 {
            warn!(job_id = %id, index, "earlier record not finished; refusing to fire");
            return Ok(BeginCommit::Stale);
        }

        let changed = tx.execute(
            "UPDATE commits SET status = 'in_progress'
             WHERE job_id = ?1 AND idx = ?2 AND status = 'pending'",
            params![id, index],
        )?;
        if changed == 0 {
            return Ok(BeginCommit::Stale);
        }

        if status == JobStatus::Pending {
            tx.execute(
                "UPDATE jobs SET status = 'in_progress', started_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, Utc::now()],
            )?;
        }

        let target = tx.query_row(
            "SELECT repo, archive_key, total_commits FROM jobs WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            },
        )?;
        let record = tx.query_row(
            &format!("SELECT {COMMIT_COLUMNS} FROM commits WHERE job_id = ?1 AND idx = ?2"),
            params![id, index],
            row_to_record,
        )?;
        tx.commit()?;

        let (repo, archive_key, total_commits) = target;
        Ok(BeginCommit::Started(CommitTarget {
            job_id: id.to_string(),
            repo,
            archive_key,
            total_commits,
            record,
        }))
    }

    /// Mark an in-flight record `completed` and bump the job counter; completes
    /// the job when no `pending` record remains.
    #[instrument(skip(self))]
    pub fn complete_commit(&self, id: &str, index: u32) -> Result<CompleteCommit> {
        let now = Utc::now();
        let mut db = self.lock();
        let tx = db.transaction()?;

        let changed = tx.execute(
            "UPDATE commits SET status = 'completed', committed_at = ?3
             WHERE job_id = ?1 AND idx = ?2 AND status = 'in_progress'",
            params![id, index, now],
        )?;
        if changed == 0 {
            return Ok(CompleteCommit::Stale);
        }
        tx.execute(
            "UPDATE jobs SET completed_commits = completed_commits + 1
             WHERE id = ?1 AND completed_commits < total_commits",
            params![id],
        )?;

        let next = tx
            .query_row(
                "SELECT idx, delay_mins FROM commits
                 WHERE job_id = ?1 AND status = 'pending'
                 ORDER BY idx LIMIT 1",
                params![id],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, u32>(1)?)),
            )
            .optional()?;

        let outcome = match next {
            Some((index, delay_mins)) => CompleteCommit::Next { index, delay_mins },
            None => {
                tx.execute(
                    "UPDATE jobs SET status = 'completed', finished_at = ?2
                     WHERE id = ?1 AND status = 'in_progress'",
                    params![id, now],
                )?;
                CompleteCommit::JobCompleted
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Mark an in-flight record `failed`, fail the job and skip every record
    /// still `pending`. Returns `false` if the record was not in flight.
    #[instrument(skip(self, error))]
    pub fn fail_commit(&self, id: &str, index: u32, error: &str) -> Result<bool> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let applied = fail_in_tx(&tx, id, index, error)?;
        tx.commit()?;
        Ok(applied)
    }

    /// Cancel a job whose cancellation was requested: skip every `pending`
    /// record and set the job `cancelled`.
    ///
    /// Returns `false` when the job is already terminal or a commit is still in
    /// flight (that commit is allowed to finish first).
    #[instrument(skip(self))]
    pub fn finalize_cancel(&self, id: &str) -> Result<bool> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let (status, _) = job_state(&tx, id)?;
        if status.is_terminal() {
            return Ok(false);
        }
        let in_flight: i64 = tx.query_row(
            "SELECT COUNT(*) FROM commits WHERE job_id = ?1 AND status = 'in_progress'",
            params![id],
            |row| row.get(0),
        )?;
        if in_flight > 0 {
            return Ok(false);
        }

        let skipped = tx.execute(
            "UPDATE commits SET status = 'skipped' WHERE job_id = ?1 AND status = 'pending'",
            params![id],
        )?;
        tx.execute(
            "UPDATE jobs SET status = 'cancelled', cancel_requested = 1, finished_at = ?2
             WHERE id = ?1 AND status IN ('pending', 'in_progress')",
            params![id, Utc::now()],
        )?;
        tx.commit()?;

        info!(job_id = %id, skipped, "job cancelled");
        Ok(true)
    }

    /// Fail a job whose in-flight record was left behind by a crash.
    #[instrument(skip(self, error))]
    pub fn fail_interrupted(&self, id: &str, error: &str) -> Result<bool> {
        let mut db = self.lock();
        let tx = db.transaction()?;
        let index: Option<u32> = tx
            .query_row(
                "SELECT idx FROM commits WHERE job_id = ?1 AND status = 'in_progress'
                 ORDER BY idx LIMIT 1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let applied = match index {
            Some(index) => fail_in_tx(&tx, id, index, error)?,
            None => false,
        };
        tx.commit()?;
        Ok(applied)
    }
}

fn fail_in_tx(tx: &Transaction<'_>, id: &str, index: u32, error: &str) -> Result<bool> {
    let changed = tx.execute(
        "UPDATE commits SET status = 'failed', error = ?3
         WHERE job_id = ?1 AND idx = ?2 AND status = 'in_progress'",
        params![id, index, error],
    )?;
    if changed == 0 {
        return Ok(false);
    }
    let skipped = tx.execute(
        "UPDATE commits SET status = 'skipped' WHERE job_id = ?1 AND status = 'pending'",
        params![id],
    )?;
    tx.execute(
        "UPDATE jobs SET status = 'failed', error = ?2, finished_at = ?3
         WHERE id = ?1 AND status IN ('pending', 'in_progress')",
        params![id, error, Utc::now()],
    )?;
    warn!(job_id = %id, index, skipped, "job failed");
    Ok(true)
}

/// `(status, cancel_requested)` for a job, or `JobNotFound`.
fn job_state(conn: &Connection, id: &str) -> Result<(JobStatus, bool)> {
    conn.query_row(
        "SELECT status, cancel_requested FROM jobs WHERE id = ?1",
        params![id],
        |row| Ok((parse_col::<JobStatus>(row, 0)?, row.get::<_, bool>(1)?)),
    )
    .optional()?
    .ok_or_else(|| StoreError::JobNotFound { id: id.to_string() })
}

fn load_detail(conn: &Connection, id: &str) -> Result<Option<JobDetail>> {
    let Some((summary, archive_key)) = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            params![id],
            row_to_summary,
        )
        .optional()?
    else {
        return Ok(None);
    };

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COMMIT_COLUMNS} FROM commits WHERE job_id = ?1 ORDER BY idx"
    ))?;
    let commits = stmt
        .query_map(params![id], row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Some(JobDetail {
        summary,
        archive_key,
        commits,
    }))
}

/// Map a `jobs` row (selected with [`JOB_COLUMNS`]) to a summary plus its archive key.
fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<(JobSummary, String)> {
    Ok((
        JobSummary {
            id: row.get(0)?,
            repo: row.get(1)?,
            status: parse_col(row, 3)?,
            total_commits: row.get(4)?,
            completed_commits: row.get(5)?,
            cancel_requested: row.get(6)?,
            created_at: row.get::<_, DateTime<Utc>>(7)?,
            started_at: row.get(8)?,
            finished_at: row.get(9)?,
            error: row.get(10)?,
        },
        row.get(2)?,
    ))
}

/// Map a `commits` row (selected with [`COMMIT_COLUMNS`]).
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<CommitRecord> {
    let files_json: String = row.get(1)?;
    let files: Vec<String> = serde_json::from_str(&files_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    Ok(CommitRecord {
        index: row.get(0)?,
        files,
        message: row.get(2)?,
        delay_mins: row.get(3)?,
        status: parse_col::<CommitStatus>(row, 4)?,
        error: row.get(5)?,
        committed_at: row.get(6)?,
    })
}

fn parse_col<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
