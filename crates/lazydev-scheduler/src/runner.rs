use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazydev_core::types::{JobDetail, JobStatus};
use lazydev_store::{BeginCommit, CompleteCommit, JobStore};
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::executor::{CommitExecutor, CommitRequest};
use crate::notify::{JobEvent, Notifier};
use crate::queue::FireTarget;
use crate::schedule::{fire_delay, resume_point};

/// Error recorded on a record found `in_progress` at startup.
pub const INTERRUPTED_ERROR: &str = "interrupted before completion was recorded";

/// Attempts at recording a pushed commit before giving up on the store.
const RECORD_ATTEMPTS: u32 = 3;
const RECORD_BACKOFF: Duration = Duration::from_millis(200);

/// What the engine should do after a firing event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Schedule record `index` to fire after `wait`.
    Next { index: u32, wait: Duration },
    /// The job reached this terminal status.
    Finished(JobStatus),
    /// Stale or duplicate event; nothing changed.
    Noop,
}

/// Drives one job's records through the store and the commit executor.
///
/// Stateless between calls: everything it knows comes from the store, so two
/// runners (or a retried event) can never double-apply a transition.
pub struct JobRunner {
    store: Arc<JobStore>,
    executor: Arc<dyn CommitExecutor>,
    notifier: Arc<dyn Notifier>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        executor: Arc<dyn CommitExecutor>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            executor,
            notifier,
        }
    }

    /// Handle one firing event for record `index` of `job_id`.
    #[instrument(skip(self), fields(executor = self.executor.name()))]
    pub async fn fire(&self, job_id: &str, index: u32) -> Result<FireOutcome> {
        let target = match self.store.begin_commit(job_id, index)? {
            BeginCommit::Started(target) => target,
            BeginCommit::CancelRequested => return self.cancel(job_id).await,
            BeginCommit::Stale => {
                debug!("stale firing ignored");
                return Ok(FireOutcome::Noop);
            }
        };

        info!(total = target.total_commits, "firing commit");
        let request = CommitRequest::from(&target);

        match self.executor.execute(&request).await {
            Ok(receipt) => {
                let outcome =
                    match with_retry(|| self.store.complete_commit(job_id, index)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(
                                repo = %request.repo,
                                commit_message = %request.message,
                                summary = %receipt.summary,
                                "commit pushed but not recorded; restart will report it interrupted: {e}"
                            );
                            return Err(e.into());
                        }
                    };
                debug!(summary = %receipt.summary, "executor succeeded");
                self.notifier
                    .notify(&JobEvent::CommitCompleted {
                        job_id: job_id.to_string(),
                        repo: request.repo.clone(),
                        index,
                        message: request.message.clone(),
                    })
                    .await;

                match outcome {
                    CompleteCommit::Next { index, delay_mins } => {
                        // Decision point: a cancel that arrived mid-push applies now.
                        if self.store.cancel_requested(job_id)? {
                            return self.cancel(job_id).await;
                        }
                        Ok(FireOutcome::Next {
                            index,
                            wait: fire_delay(index, delay_mins),
                        })
                    }
                    CompleteCommit::JobCompleted => {
                        self.finish(job_id).await?;
                        Ok(FireOutcome::Finished(JobStatus::Completed))
                    }
                    CompleteCommit::Stale => Ok(FireOutcome::Noop),
                }
            }
            Err(e) => {
                let error = e.to_string();
                if !self.store.fail_commit(job_id, index, &error)? {
                    return Ok(FireOutcome::Noop);
                }
                self.notifier
                    .notify(&JobEvent::CommitFailed {
                        job_id: job_id.to_string(),
                        repo: request.repo.clone(),
                        index,
                        message: request.message.clone(),
                        error,
                    })
                    .await;
                self.finish(job_id).await?;
                Ok(FireOutcome::Finished(JobStatus::Failed))
            }
        }
    }

    /// Observe a recorded cancellation: skip what is left and cancel the job.
    ///
    /// A no-op while a commit is still in flight; that firing calls back here
    /// once it completes.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: &str) -> Result<FireOutcome> {
        if !self.store.finalize_cancel(job_id)? {
            return Ok(FireOutcome::Noop);
        }
        self.finish(job_id).await?;
        Ok(FireOutcome::Finished(JobStatus::Cancelled))
    }

    /// Settle a job whose firing task died without reporting back: fail the
    /// record it left in flight, else apply a recorded cancellation.
    #[instrument(skip(self))]
    pub async fn abandon(&self, job_id: &str, error: &str) -> Result<FireOutcome> {
        if self.store.fail_interrupted(job_id, error)? {
            self.finish(job_id).await?;
            return Ok(FireOutcome::Finished(JobStatus::Failed));
        }
        if self.store.cancel_requested(job_id)? {
            return self.cancel(job_id).await;
        }
        Ok(FireOutcome::Noop)
    }

    /// Bring a non-terminal job back under scheduling (submission or restart).
    ///
    /// Returns the next firing and its wait, or `None` if the job was settled
    /// here instead (interrupted push, pending cancellation, nothing left).
    #[instrument(skip(self, job, now), fields(job_id = %job.id()))]
    pub async fn recover(
        &self,
        job: &JobDetail,
        now: DateTime<Utc>,
    ) -> Result<Option<(FireTarget, Duration)>> {
        let job_id = job.id();
        if job.status().is_terminal() {
            return Ok(None);
        }

        if let Some(stuck) = job.in_flight() {
            warn!(index = stuck.index, "record was in flight at shutdown; failing job");
            if self.store.fail_interrupted(job_id, INTERRUPTED_ERROR)? {
                self.notifier
                    .notify(&JobEvent::CommitFailed {
                        job_id: job_id.to_string(),
                        repo: job.summary.repo.clone(),
                        index: stuck.index,
                        message: stuck.message.clone(),
                        error: INTERRUPTED_ERROR.to_string(),
                    })
                    .await;
                self.finish(job_id).await?;
            }
            return Ok(None);
        }

        if job.summary.cancel_requested {
            self.cancel(job_id).await?;
            return Ok(None);
        }

        Ok(resume_point(job, now).map(|p| {
            (
                FireTarget {
                    job_id: job_id.to_string(),
                    index: p.index,
                },
                p.wait,
            )
        }))
    }

    /// Terminal bookkeeping: final notification and executor cleanup.
    async fn finish(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.store.get_job(job_id)? else {
            return Ok(());
        };
        self.notifier
            .notify(&JobEvent::JobFinished {
                job_id: job_id.to_string(),
                repo: job.summary.repo.clone(),
                status: job.status(),
                total_commits: job.summary.total_commits,
                completed_commits: job.summary.completed_commits,
            })
            .await;
        self.executor.release(job_id, &job.archive_key).await;
        Ok(())
    }
}

/// Run a store update, retrying with a growing pause.
async fn with_retry<T>(
    mut op: impl FnMut() -> lazydev_store::Result<T>,
) -> lazydev_store::Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < RECORD_ATTEMPTS => {
                warn!(attempt, "store update failed, retrying: {e}");
                tokio::time::sleep(RECORD_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommitReceipt, ExecutorError};
    use async_trait::async_trait;
    use lazydev_core::types::{CommitPlan, CommitPlanEntry, CommitStatus};
    use std::sync::Mutex;

    /// Records calls; fails on the indices listed in `fail_on`.
    #[derive(Default)]
    struct ScriptedExecutor {
        fail_on: Vec<u32>,
        calls: Mutex<Vec<u32>>,
        released: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommitExecutor for ScriptedExecutor {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn execute(&self, req: &CommitRequest) -> std::result::Result<CommitReceipt, ExecutorError> {
            self.calls.lock().unwrap().push(req.index);
            if self.fail_on.contains(&req.index) {
                return Err(ExecutorError::Git {
                    step: "push".into(),
                    output: "remote rejected".into(),
                });
            }
            Ok(CommitReceipt {
                summary: format!("committed {} files", req.files.len()),
            })
        }
        async fn release(&self, job_id: &str, _archive_key: &str) {
            self.released.lock().unwrap().push(job_id.to_string());
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<JobEvent>>);

    #[async_trait]
    impl Notifier for Events {
        async fn notify(&self, event: &JobEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Fixture {
        store: Arc<JobStore>,
        executor: Arc<ScriptedExecutor>,
        events: Arc<Events>,
        runner: JobRunner,
    }

    fn fixture(commits: usize, fail_on: Vec<u32>) -> Fixture {
        let store = Arc::new(JobStore::open_in_memory().unwrap());
        let plan = CommitPlan {
            repo: "octo/repo".into(),
            commits: (0..commits)
                .map(|i| CommitPlanEntry {
                    files: vec![format!("f{i}")],
                    message: format!("commit {i}"),
                    delay_mins: 10,
                })
                .collect(),
        };
        store.create_job("job", &plan, "jobs/job/source.zip").unwrap();

        let executor = Arc::new(ScriptedExecutor {
            fail_on,
            ..Default::default()
        });
        let events = Arc::new(Events::default());
        let runner = JobRunner::new(store.clone(), executor.clone(), events.clone());
        Fixture {
            store,
            executor,
            events,
            runner,
        }
    }

    fn statuses(f: &Fixture) -> Vec<CommitStatus> {
        f.store
            .get_job("job")
            .unwrap()
            .unwrap()
            .commits
            .iter()
            .map(|c| c.status)
            .collect()
    }

    #[tokio::test]
    async fn runs_plan_to_completion() {
        let f = fixture(3, vec![]);

        assert_eq!(
            f.runner.fire("job", 0).await.unwrap(),
            FireOutcome::Next {
                index: 1,
                wait: Duration::from_secs(600)
            }
        );
        assert!(matches!(
            f.runner.fire("job", 1).await.unwrap(),
            FireOutcome::Next { index: 2, .. }
        ));
        assert_eq!(
            f.runner.fire("job", 2).await.unwrap(),
            FireOutcome::Finished(JobStatus::Completed)
        );

        let job = f.store.get_job("job").unwrap().unwrap();
        assert_eq!(job.summary.completed_commits, 3);
        assert_eq!(*f.executor.calls.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*f.executor.released.lock().unwrap(), vec!["job".to_string()]);
        assert!(matches!(
            f.events.0.lock().unwrap().last(),
            Some(JobEvent::JobFinished {
                status: JobStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn first_failure_skips_rest_without_more_calls() {
        let f = fixture(3, vec![0]);

        assert_eq!(
            f.runner.fire("job", 0).await.unwrap(),
            FireOutcome::Finished(JobStatus::Failed)
        );
        // a stray event for the next index does nothing
        assert_eq!(f.runner.fire("job", 1).await.unwrap(), FireOutcome::Noop);

        assert_eq!(*f.executor.calls.lock().unwrap(), vec![0]);
        assert_eq!(
            statuses(&f),
            vec![
                CommitStatus::Failed,
                CommitStatus::Skipped,
                CommitStatus::Skipped
            ]
        );
        let job = f.store.get_job("job").unwrap().unwrap();
        assert_eq!(job.summary.status, JobStatus::Failed);
        assert_eq!(
            job.summary.error.as_deref(),
            Some("git push failed: remote rejected")
        );
        assert_eq!(job.commits[0].error, job.summary.error);
    }

    #[tokio::test]
    async fn duplicate_fire_is_noop() {
        let f = fixture(2, vec![]);
        f.runner.fire("job", 0).await.unwrap();
        assert_eq!(f.runner.fire("job", 0).await.unwrap(), FireOutcome::Noop);
        assert_eq!(*f.executor.calls.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn cancellation_observed_at_next_firing() {
        let f = fixture(3, vec![]);
        f.runner.fire("job", 0).await.unwrap();
        f.store.request_cancel("job").unwrap();

        assert_eq!(
            f.runner.fire("job", 1).await.unwrap(),
            FireOutcome::Finished(JobStatus::Cancelled)
        );
        assert_eq!(*f.executor.calls.lock().unwrap(), vec![0]);
        assert_eq!(
            statuses(&f),
            vec![
                CommitStatus::Completed,
                CommitStatus::Skipped,
                CommitStatus::Skipped
            ]
        );
        // cancelling again changes nothing
        assert_eq!(f.runner.cancel("job").await.unwrap(), FireOutcome::Noop);
    }

    #[tokio::test]
    async fn recover_fails_interrupted_job() {
        let f = fixture(2, vec![]);
        f.store.begin_commit("job", 0).unwrap();
        let job = f.store.get_job("job").unwrap().unwrap();

        assert!(f.runner.recover(&job, Utc::now()).await.unwrap().is_none());
        let job = f.store.get_job("job").unwrap().unwrap();
        assert_eq!(job.summary.status, JobStatus::Failed);
        assert_eq!(job.commits[0].error.as_deref(), Some(INTERRUPTED_ERROR));
        assert!(f.executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recover_fresh_job_fires_first_record_now() {
        let f = fixture(2, vec![]);
        let job = f.store.get_job("job").unwrap().unwrap();
        let (target, wait) = f.runner.recover(&job, Utc::now()).await.unwrap().unwrap();
        assert_eq!(target.index, 0);
        assert_eq!(wait, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn store_update_is_retried_before_giving_up() {
        let mut calls = 0;
        let value = with_retry(|| {
            calls += 1;
            if calls < 3 {
                Err(lazydev_store::StoreError::Io(std::io::Error::other("database is locked")))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!((value, calls), (7, 3));

        let mut calls = 0;
        let err = with_retry(|| -> lazydev_store::Result<()> {
            calls += 1;
            Err(lazydev_store::StoreError::Io(std::io::Error::other("disk full")))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(calls, RECORD_ATTEMPTS);
    }

    #[tokio::test]
    async fn abandon_fails_the_record_left_in_flight() {
        let f = fixture(3, vec![]);
        f.store.begin_commit("job", 0).unwrap();

        assert_eq!(
            f.runner.abandon("job", "firing task aborted").await.unwrap(),
            FireOutcome::Finished(JobStatus::Failed)
        );
        assert_eq!(
            statuses(&f),
            vec![CommitStatus::Failed, CommitStatus::Skipped, CommitStatus::Skipped]
        );
        let job = f.store.get_job("job").unwrap().unwrap();
        assert_eq!(job.summary.error.as_deref(), Some("firing task aborted"));

        // nothing left to settle
        assert_eq!(
            f.runner.abandon("job", "again").await.unwrap(),
            FireOutcome::Noop
        );
    }
}
