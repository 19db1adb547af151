use rusqlite::Connection;

use crate::error::Result;

/// Initialise the job store schema in `conn`.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                TEXT    NOT NULL PRIMARY KEY,
            repo              TEXT    NOT NULL,
            archive_key       TEXT    NOT NULL,
            status            TEXT    NOT NULL DEFAULT 'pending',
            total_commits     INTEGER NOT NULL,
            completed_commits INTEGER NOT NULL DEFAULT 0,
            cancel_requested  INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT    NOT NULL,
            started_at        TEXT,
            finished_at       TEXT,
            error             TEXT
        );

        CREATE TABLE IF NOT EXISTS commits (
            job_id       TEXT    NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            idx          INTEGER NOT NULL,
            files        TEXT    NOT NULL,   -- JSON array of relative paths
            message      TEXT    NOT NULL,
            delay_mins   INTEGER NOT NULL,
            status       TEXT    NOT NULL DEFAULT 'pending',
            error        TEXT,
            committed_at TEXT,
            PRIMARY KEY (job_id, idx)
        );

        -- Dashboard listing: newest first.
        CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs (created_at DESC);
        -- Restart recovery: non-terminal jobs.
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
        ",
    )?;
    Ok(())
}
