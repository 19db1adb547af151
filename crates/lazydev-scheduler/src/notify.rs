//! Job and commit event sinks.
//!
//! Notification is fire-and-forget: a sink that fails logs a warning and the
//! job carries on untouched.

use std::sync::Arc;

use async_trait::async_trait;
use lazydev_core::types::JobStatus;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    CommitCompleted {
        job_id: String,
        repo: String,
        index: u32,
        message: String,
    },
    CommitFailed {
        job_id: String,
        repo: String,
        index: u32,
        message: String,
        error: String,
    },
    JobFinished {
        job_id: String,
        repo: String,
        status: JobStatus,
        total_commits: u32,
        completed_commits: u32,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &JobEvent);
}

/// Writes every event to the tracing log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &JobEvent) {
        match event {
            JobEvent::CommitCompleted {
                job_id,
                repo,
                index,
                message,
            } => info!(%job_id, %repo, index, %message, "commit pushed"),
            JobEvent::CommitFailed {
                job_id,
                repo,
                index,
                error,
                ..
            } => warn!(%job_id, %repo, index, %error, "commit failed"),
            JobEvent::JobFinished {
                job_id,
                repo,
                status,
                total_commits,
                completed_commits,
            } => info!(
                %job_id, %repo, %status, total_commits, completed_commits,
                "job finished"
            ),
        }
    }
}

/// POSTs each event as JSON to a fixed URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &JobEvent) {
        let result = self
            .client
            .post(&self.url)
            .json(event)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .and_then(|r| r.error_for_status());
        if let Err(e) = result {
            warn!(url = %self.url, error = %e, "notification webhook failed");
        }
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct MultiNotifier {
    sinks: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify(&self, event: &JobEvent) {
        for sink in &self.sinks {
            sink.notify(event).await;
        }
    }
}
