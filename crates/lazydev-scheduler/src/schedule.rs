use std::time::Duration;

use chrono::{DateTime, Utc};
use lazydev_core::types::{CommitStatus, JobDetail};

/// How long record `index` waits after the previous commit completed (or the
/// job started). The first record's stored delay is ignored: it fires as soon
/// as the job starts.
pub fn fire_delay(index: u32, delay_mins: u32) -> Duration {
    if index == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs(u64::from(delay_mins) * 60)
    }
}

/// Where a recovered job picks up: the next `pending` record and how long
/// until it is due, measured against wall-clock `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub index: u32,
    pub wait: Duration,
}

/// Compute the resume point from persisted timestamps. This runs once per job
/// at enqueue time; afterwards the engine works on the monotonic clock.
///
/// Returns `None` when no record is `pending`.
pub fn resume_point(job: &JobDetail, now: DateTime<Utc>) -> Option<ResumePoint> {
    let next = job
        .commits
        .iter()
        .find(|c| c.status == CommitStatus::Pending)?;

    let reference = job
        .commits
        .iter()
        .take_while(|c| c.index < next.index)
        .filter(|c| c.status == CommitStatus::Completed)
        .filter_map(|c| c.committed_at)
        .last()
        .or(job.summary.started_at);

    let delay = fire_delay(next.index, next.delay_mins);
    let wait = match reference {
        // not started: fire immediately
        None => Duration::ZERO,
        Some(reference) => {
            let due = reference + chrono::Duration::seconds(delay.as_secs() as i64);
            (due - now).to_std().unwrap_or(Duration::ZERO)
        }
    };

    Some(ResumePoint {
        index: next.index,
        wait,
    })
}
