use async_trait::async_trait;
use lazydev_store::CommitTarget;
use thiserror::Error;

/// Everything the executor needs to push one commit.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub job_id: String,
    /// `owner/name`
    pub repo: String,
    /// Storage key of the job's uploaded archive.
    pub archive_key: String,
    pub index: u32,
    pub total_commits: u32,
    pub files: Vec<String>,
    pub message: String,
}

impl From<&CommitTarget> for CommitRequest {
    fn from(t: &CommitTarget) -> Self {
        Self {
            job_id: t.job_id.clone(),
            repo: t.repo.clone(),
            archive_key: t.archive_key.clone(),
            index: t.record.index,
            total_commits: t.total_commits,
            files: t.record.files.clone(),
            message: t.record.message.clone(),
        }
    }
}

/// Successful push.
#[derive(Debug, Clone, Default)]
pub struct CommitReceipt {
    /// Human-readable summary, e.g. the number of files staged.
    pub summary: String,
}

/// Typed push failure. Its `Display` text is what ends up in the record's
/// `error` field.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("workspace setup failed: {0}")]
    Workspace(String),

    #[error("no files found to commit")]
    NoFiles,

    #[error("git {step} failed: {output}")]
    Git { step: String, output: String },

    #[error("git {step} timed out after {secs}s")]
    Timeout { step: String, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The push capability. Implementations may retry internally but must not
/// record two commits for one request.
#[async_trait]
pub trait CommitExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, request: &CommitRequest) -> Result<CommitReceipt, ExecutorError>;

    /// Called once when the job reaches a terminal status.
    async fn release(&self, _job_id: &str, _archive_key: &str) {}
}
