//! Local countdown to a job's next commit, derived from the last snapshot.
//!
//! The estimate is advisory. The server decides when a commit fires; each
//! new snapshot replaces whatever was computed from the previous one.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazydev_core::types::{CommitStatus, JobDetail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// The job has not started yet.
    Starting,
    /// The next commit is being pushed right now.
    Pushing,
    /// The next commit is due (or has no delay) and should land shortly.
    Processing,
    /// Time left until the next commit is due.
    Remaining(Duration),
}

impl fmt::Display for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Countdown::Starting => f.write_str("Starting..."),
            Countdown::Pushing => f.write_str("Pushing..."),
            Countdown::Processing => f.write_str("Processing..."),
            Countdown::Remaining(left) => {
                let secs = left.as_secs();
                write!(f, "{}m {}s", secs / 60, secs % 60)
            }
        }
    }
}

/// Countdown for `job` at `now`, or `None` when nothing is left to wait for.
pub fn reconcile(job: &JobDetail, now: DateTime<Utc>) -> Option<Countdown> {
    if job.status().is_terminal() {
        return None;
    }

    let mut reference = None;
    let mut next = None;
    for record in &job.commits {
        if record.status == CommitStatus::Completed {
            if let Some(at) = record.committed_at {
                reference = Some(at);
            }
        }
        if next.is_none()
            && matches!(record.status, CommitStatus::Pending | CommitStatus::InProgress)
        {
            next = Some(record);
        }
    }
    let next = next?;

    let Some(reference) = reference.or(job.summary.started_at) else {
        return Some(Countdown::Starting);
    };
    if next.status == CommitStatus::InProgress {
        return Some(Countdown::Pushing);
    }
    // The first record fires at job start regardless of its stored delay.
    if next.index == 0 || next.delay_mins == 0 {
        return Some(Countdown::Processing);
    }

    let due = reference + chrono::Duration::minutes(i64::from(next.delay_mins));
    match (due - now).to_std() {
        Ok(left) if !left.is_zero() => Some(Countdown::Remaining(left)),
        _ => Some(Countdown::Processing),
    }
}
