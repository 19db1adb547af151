use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lazydev_store::JobStore;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SchedulerError};
use crate::queue::{FireQueue, FireTarget};
use crate::runner::{FireOutcome, JobRunner};

/// Requests delivered to a running [`SchedulerEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// A job was persisted and should be brought under scheduling.
    Enqueue { job_id: String },
    /// Cancellation intent was recorded in the store for this job.
    Cancel { job_id: String },
}

/// Cheap, cloneable sender side of the engine.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub async fn enqueue(&self, job_id: impl Into<String>) -> Result<()> {
        self.send(SchedulerCommand::Enqueue {
            job_id: job_id.into(),
        })
        .await
    }

    /// Wake the engine after `JobStore::request_cancel` recorded the intent.
    pub async fn cancel(&self, job_id: impl Into<String>) -> Result<()> {
        self.send(SchedulerCommand::Cancel {
            job_id: job_id.into(),
        })
        .await
    }

    async fn send(&self, cmd: SchedulerCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SchedulerError::EngineStopped)
    }
}

enum Work {
    Fire(u32),
    Cancel,
}

type Done = (String, Result<FireOutcome>);

/// Default wait for in-flight firings at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(300);

/// Owns the fire queue and dispatches due records to the [`JobRunner`].
///
/// At most one firing per job is in flight at a time; different jobs run
/// concurrently on their own tasks.
pub struct SchedulerEngine {
    store: Arc<JobStore>,
    runner: Arc<JobRunner>,
    queue: FireQueue,
    in_flight: HashSet<String>,
    /// Cancel commands that arrived while the job had a firing in flight.
    cancel_pending: HashSet<String>,
    commands: mpsc::Receiver<SchedulerCommand>,
    done_tx: mpsc::UnboundedSender<Done>,
    done_rx: mpsc::UnboundedReceiver<Done>,
    shutdown_grace: Duration,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<JobStore>,
        runner: Arc<JobRunner>,
        capacity: usize,
    ) -> (Self, SchedulerHandle) {
        let (tx, commands) = mpsc::channel(capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let engine = Self {
            store,
            runner,
            queue: FireQueue::new(),
            in_flight: HashSet::new(),
            cancel_pending: HashSet::new(),
            commands,
            done_tx,
            done_rx,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        };
        (engine, SchedulerHandle { tx })
    }

    /// How long `run` waits for in-flight firings once shutdown is signalled.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Main event loop. Recovers unfinished jobs, then runs until `shutdown`
    /// broadcasts `true`. Firings already in flight are then given up to the
    /// shutdown grace to finish; nothing new is started.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        self.recover_all().await;

        loop {
            let deadline = self.queue.next_deadline();
            tokio::select! {
                _ = sleep_until(deadline) => self.fire_due(),
                Some(cmd) = self.commands.recv() => self.handle_command(cmd).await,
                Some((job_id, outcome)) = self.done_rx.recv() => self.on_done(job_id, outcome),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(
                            queued = self.queue.len(),
                            in_flight = self.in_flight.len(),
                            "scheduler engine shutting down"
                        );
                        break;
                    }
                }
            }
        }
        self.drain().await;
    }

    async fn drain(&mut self) {
        if self.in_flight.is_empty() {
            return;
        }
        info!(in_flight = self.in_flight.len(), "waiting for in-flight firings");
        let deadline = Instant::now() + self.shutdown_grace;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.done_rx.recv()).await {
                Ok(Some((job_id, outcome))) => {
                    self.in_flight.remove(&job_id);
                    if let Err(e) = outcome {
                        error!(%job_id, "firing failed: {e}");
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.in_flight.len(),
                        "shutdown grace elapsed; in-flight firings abandoned"
                    );
                    break;
                }
            }
        }
    }

    async fn recover_all(&mut self) {
        let jobs = match self.store.list_unfinished() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("restart recovery query failed: {e}");
                return;
            }
        };
        if !jobs.is_empty() {
            info!(count = jobs.len(), "recovering unfinished jobs");
        }
        for job in jobs {
            match self.runner.recover(&job, Utc::now()).await {
                Ok(Some((target, wait))) => self.queue.schedule(target, Instant::now() + wait),
                Ok(None) => {}
                Err(e) => error!(job_id = %job.id(), "recovery failed: {e}"),
            }
        }
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Enqueue { job_id } => {
                if self.in_flight.contains(&job_id) || self.queue.contains(&job_id) {
                    debug!(%job_id, "already scheduled");
                    return;
                }
                let job = match self.store.get_job(&job_id) {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        warn!(%job_id, "enqueue for unknown job ignored");
                        return;
                    }
                    Err(e) => {
                        error!(%job_id, "enqueue lookup failed: {e}");
                        return;
                    }
                };
                match self.runner.recover(&job, Utc::now()).await {
                    Ok(Some((target, wait))) => {
                        debug!(%job_id, index = target.index, wait_secs = wait.as_secs(), "job scheduled");
                        self.queue.schedule(target, Instant::now() + wait);
                    }
                    Ok(None) => {}
                    Err(e) => error!(%job_id, "enqueue failed: {e}"),
                }
            }
            SchedulerCommand::Cancel { job_id } => {
                if self.in_flight.contains(&job_id) {
                    debug!(%job_id, "cancel deferred until in-flight firing returns");
                    self.cancel_pending.insert(job_id);
                    return;
                }
                self.queue.remove(&job_id);
                self.spawn(job_id, Work::Cancel);
            }
        }
    }

    fn fire_due(&mut self) {
        for FireTarget { job_id, index } in self.queue.pop_due(Instant::now()) {
            self.spawn(job_id, Work::Fire(index));
        }
    }

    fn spawn(&mut self, job_id: String, work: Work) {
        self.in_flight.insert(job_id.clone());
        let runner = self.runner.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let task = tokio::spawn({
                let runner = runner.clone();
                let job_id = job_id.clone();
                async move {
                    match work {
                        Work::Fire(index) => runner.fire(&job_id, index).await,
                        Work::Cancel => runner.cancel(&job_id).await,
                    }
                }
            });
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let reason = format!("firing task aborted: {e}");
                    error!(%job_id, "{reason}");
                    runner.abandon(&job_id, &reason).await
                }
            };
            // Receiver lives as long as the engine.
            let _ = done.send((job_id, outcome));
        });
    }

    fn on_done(&mut self, job_id: String, outcome: Result<FireOutcome>) {
        self.in_flight.remove(&job_id);
        let cancel = self.cancel_pending.remove(&job_id);

        match outcome {
            Ok(FireOutcome::Finished(status)) => {
                info!(%job_id, %status, "job finished");
                return;
            }
            Ok(FireOutcome::Next { index, wait }) if !cancel => {
                self.queue.schedule(FireTarget { job_id, index }, Instant::now() + wait);
                return;
            }
            Ok(_) => {}
            Err(e) => error!(%job_id, "firing failed: {e}"),
        }
        if cancel {
            self.spawn(job_id, Work::Cancel);
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
