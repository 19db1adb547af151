//! Polling loops that keep a local view of one job (or the job list) fresh.
//!
//! Every loop is a task tied to a [`CancellationToken`]; dropping or stopping
//! the watcher cancels them all.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lazydev_core::types::{JobDetail, JobSummary};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::JobSource;
use crate::reconciler::{reconcile, Countdown};

/// Poll interval for a single non-terminal job.
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Poll interval for the job list.
pub const LIST_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Countdown re-render interval. Never touches the network.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Latest known state of a watched job.
#[derive(Debug, Clone, Default)]
pub struct JobView {
    /// Last snapshot confirmed by the server.
    pub job: Option<JobDetail>,
    pub countdown: Option<Countdown>,
    /// Error from the most recent poll, cleared by the next success.
    pub error: Option<String>,
    /// Polling stopped because the credential was rejected.
    pub unauthorized: bool,
}

impl JobView {
    /// Nothing more will change: the job is terminal or polling was refused.
    pub fn is_final(&self) -> bool {
        self.unauthorized || self.job.as_ref().is_some_and(|j| j.status().is_terminal())
    }
}

pub struct JobWatcher {
    cancel: CancellationToken,
    view: watch::Receiver<JobView>,
    tasks: Vec<JoinHandle<()>>,
}

impl JobWatcher {
    /// Start polling `job_id` and ticking its countdown.
    pub fn spawn(source: Arc<dyn JobSource>, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        let cancel = CancellationToken::new();
        let (tx, view) = watch::channel(JobView::default());
        let tx = Arc::new(tx);

        let poll = tokio::spawn(poll_job(source, job_id, tx.clone(), cancel.clone()));
        let tick = tokio::spawn(tick_countdown(tx, cancel.clone()));

        Self {
            cancel,
            view,
            tasks: vec![poll, tick],
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.view.clone()
    }

    pub fn current(&self) -> JobView {
        self.view.borrow().clone()
    }

    /// Cancel both loops and wait for them to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for JobWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_job(
    source: Arc<dyn JobSource>,
    job_id: String,
    tx: Arc<watch::Sender<JobView>>,
    cancel: CancellationToken,
) {
    loop {
        match source.fetch_job(&job_id).await {
            Ok(job) => {
                let terminal = job.status().is_terminal();
                tx.send_modify(|view| {
                    view.countdown = reconcile(&job, Utc::now());
                    view.job = Some(job);
                    view.error = None;
                });
                if terminal {
                    debug!(%job_id, "job is terminal; polling stopped");
                    break;
                }
            }
            Err(e) if e.needs_login() => {
                warn!(%job_id, "polling stopped: {e}");
                tx.send_modify(|view| {
                    view.unauthorized = true;
                    view.countdown = None;
                    view.error = Some(e.to_string());
                });
                break;
            }
            Err(e) => {
                warn!(%job_id, "poll failed: {e}");
                tx.send_modify(|view| view.error = Some(e.to_string()));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(JOB_POLL_INTERVAL) => {}
        }
    }
}

/// Recompute the countdown from the last snapshot once a second.
async fn tick_countdown(tx: Arc<watch::Sender<JobView>>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if tx.borrow().is_final() {
            break;
        }
        tx.send_if_modified(|view| {
            let next = view.job.as_ref().and_then(|j| reconcile(j, Utc::now()));
            if next == view.countdown {
                return false;
            }
            view.countdown = next;
            true
        });
    }
}

/// Latest known job list.
#[derive(Debug, Clone, Default)]
pub struct ListView {
    pub jobs: Vec<JobSummary>,
    pub error: Option<String>,
    pub unauthorized: bool,
}

pub struct JobListWatcher {
    cancel: CancellationToken,
    view: watch::Receiver<ListView>,
    task: Option<JoinHandle<()>>,
}

impl JobListWatcher {
    pub fn spawn(source: Arc<dyn JobSource>) -> Self {
        let cancel = CancellationToken::new();
        let (tx, view) = watch::channel(ListView::default());
        let task = tokio::spawn(poll_list(source, tx, cancel.clone()));
        Self {
            cancel,
            view,
            task: Some(task),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ListView> {
        self.view.clone()
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for JobListWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_list(
    source: Arc<dyn JobSource>,
    tx: watch::Sender<ListView>,
    cancel: CancellationToken,
) {
    loop {
        match source.fetch_jobs().await {
            Ok(jobs) => tx.send_modify(|view| {
                view.jobs = jobs;
                view.error = None;
            }),
            Err(e) if e.needs_login() => {
                warn!("job list polling stopped: {e}");
                tx.send_modify(|view| {
                    view.unauthorized = true;
                    view.error = Some(e.to_string());
                });
                break;
            }
            Err(e) => {
                warn!("job list poll failed: {e}");
                tx.send_modify(|view| view.error = Some(e.to_string()));
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(LIST_POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, Result};
    use async_trait::async_trait;
    use lazydev_core::types::{CommitRecord, CommitStatus, JobStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses; repeats the last one when exhausted.
    struct Scripted {
        jobs: Mutex<VecDeque<Result<JobDetail>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(script: Vec<Result<JobDetail>>) -> Arc<Self> {
            Arc::new(Self {
                jobs: Mutex::new(script.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl JobSource for Scripted {
        async fn fetch_job(&self, _id: &str) -> Result<JobDetail> {
            *self.calls.lock().unwrap() += 1;
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.len() > 1 {
                jobs.pop_front().unwrap()
            } else {
                match jobs.front().unwrap() {
                    Ok(job) => Ok(job.clone()),
                    Err(_) => Err(ClientError::Unauthorized),
                }
            }
        }

        async fn fetch_jobs(&self) -> Result<Vec<JobSummary>> {
            *self.calls.lock().unwrap() += 1;
            Ok(Vec::new())
        }
    }

    fn snapshot(status: JobStatus, record: CommitStatus) -> JobDetail {
        JobDetail {
            summary: JobSummary {
                id: "j".into(),
                repo: "o/r".into(),
                status,
                total_commits: 1,
                completed_commits: 0,
                cancel_requested: false,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                finished_at: None,
                error: None,
            },
            archive_key: String::new(),
            commits: vec![CommitRecord {
                index: 0,
                files: vec!["f".into()],
                message: "m".into(),
                delay_mins: 0,
                status: record,
                error: None,
                committed_at: None,
            }],
        }
    }

    async fn wait_final(rx: &mut watch::Receiver<JobView>) -> JobView {
        rx.wait_for(JobView::is_final).await.unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_once_terminal() {
        let source = Scripted::new(vec![
            Ok(snapshot(JobStatus::InProgress, CommitStatus::InProgress)),
            Ok(snapshot(JobStatus::Completed, CommitStatus::Completed)),
        ]);
        let watcher = JobWatcher::spawn(source.clone(), "j");
        let mut rx = watcher.subscribe();

        let view = wait_final(&mut rx).await;
        assert_eq!(view.job.unwrap().status(), JobStatus::Completed);
        assert_eq!(view.countdown, None);

        tokio::time::sleep(JOB_POLL_INTERVAL * 5).await;
        assert_eq!(source.calls(), 2);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_on_rejected_credential() {
        let source = Scripted::new(vec![
            Ok(snapshot(JobStatus::InProgress, CommitStatus::InProgress)),
            Err(ClientError::Unauthorized),
        ]);
        let watcher = JobWatcher::spawn(source.clone(), "j");
        let mut rx = watcher.subscribe();

        let view = wait_final(&mut rx).await;
        assert!(view.unauthorized);
        // last confirmed snapshot is kept
        assert_eq!(view.job.unwrap().status(), JobStatus::InProgress);

        tokio::time::sleep(JOB_POLL_INTERVAL * 5).await;
        assert_eq!(source.calls(), 2);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_follows_snapshot() {
        let source = Scripted::new(vec![Ok(snapshot(
            JobStatus::InProgress,
            CommitStatus::InProgress,
        ))]);
        let watcher = JobWatcher::spawn(source.clone(), "j");
        let mut rx = watcher.subscribe();

        let view = rx
            .wait_for(|v| v.job.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(view.countdown, Some(Countdown::Pushing));

        tokio::time::sleep(JOB_POLL_INTERVAL * 2 + Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 3);
        watcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn list_watcher_polls_until_stopped() {
        let source = Scripted::new(vec![Ok(snapshot(
            JobStatus::Pending,
            CommitStatus::Pending,
        ))]);
        let watcher = JobListWatcher::spawn(source.clone());

        tokio::time::sleep(LIST_POLL_INTERVAL * 3 + Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 4);

        watcher.stop().await;
        tokio::time::sleep(LIST_POLL_INTERVAL * 3).await;
        assert_eq!(source.calls(), 4);
    }
}
