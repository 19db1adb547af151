use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, no commit has fired yet.
    Pending,
    /// At least one commit has fired and the plan is not finished.
    InProgress,
    /// Every commit in the plan was pushed.
    Completed,
    /// A commit failed; the rest of the plan was skipped.
    Failed,
    /// Cancellation was observed; the rest of the plan was skipped.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Lifecycle state of a single commit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// Never attempted because the job failed or was cancelled first.
    Skipped,
}

impl CommitStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, CommitStatus::Pending | CommitStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommitStatus::Pending => "pending",
            CommitStatus::InProgress => "in_progress",
            CommitStatus::Completed => "completed",
            CommitStatus::Failed => "failed",
            CommitStatus::Cancelled => "cancelled",
            CommitStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommitStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CommitStatus::Pending),
            "in_progress" => Ok(CommitStatus::InProgress),
            "completed" => Ok(CommitStatus::Completed),
            "failed" => Ok(CommitStatus::Failed),
            "cancelled" => Ok(CommitStatus::Cancelled),
            "skipped" => Ok(CommitStatus::Skipped),
            other => Err(format!("unknown commit status: {other}")),
        }
    }
}

/// One entry of a submitted plan. Immutable once the job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlanEntry {
    /// Paths relative to the archive root, staged in this commit.
    pub files: Vec<String>,
    pub message: String,
    /// Minutes after the previous commit completed before this one may fire.
    /// Ignored for the first entry, which fires when the job starts.
    #[serde(default)]
    pub delay_mins: u32,
}

/// A full submission: target repository plus the ordered entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPlan {
    /// `owner/name`
    pub repo: String,
    pub commits: Vec<CommitPlanEntry>,
}

/// Persisted state of one plan entry inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Position in the plan; the record's identity within its job.
    pub index: u32,
    pub files: Vec<String>,
    pub message: String,
    pub delay_mins: u32,
    pub status: CommitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<DateTime<Utc>>,
}

/// Job metadata without its commit records: the `list jobs` projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub repo: String,
    pub status: JobStatus,
    pub total_commits: u32,
    pub completed_commits: u32,
    /// Set once a cancellation has been requested, even before it is observed.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full job snapshot: summary plus the ordered commit records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    /// Storage key of the uploaded archive. Server-side only.
    #[serde(default, skip_serializing)]
    pub archive_key: String,
    pub commits: Vec<CommitRecord>,
}

impl JobDetail {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn status(&self) -> JobStatus {
        self.summary.status
    }

    /// The record currently executing, if any.
    pub fn in_flight(&self) -> Option<&CommitRecord> {
        self.commits
            .iter()
            .find(|c| c.status == CommitStatus::InProgress)
    }
}
