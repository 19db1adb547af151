use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use lazydev_core::config::GithubConfig;
use lazydev_store::ArchiveStore;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::executor::{CommitExecutor, CommitReceipt, CommitRequest, ExecutorError};
use crate::workspace::{unpack_archive, MAX_UNPACKED_BYTES};

/// Pushes commits by shelling out to the `git` binary.
///
/// Each job gets a working tree at `<work_dir>/<job_id>/source`, unpacked
/// from its archive on first use and kept until the job is terminal.
pub struct GitExecutor {
    github: GithubConfig,
    work_dir: PathBuf,
    archives: ArchiveStore,
}

struct GitOutput {
    ok: bool,
    text: String,
}

impl GitExecutor {
    pub fn new(github: GithubConfig, work_dir: impl Into<PathBuf>, archives: ArchiveStore) -> Self {
        Self {
            github,
            work_dir: work_dir.into(),
            archives,
        }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(job_id)
    }

    fn source_dir(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join("source")
    }

    fn remote_url(&self, repo: &str) -> String {
        match &self.github.token {
            Some(token) => format!(
                "https://{}:{}@{}/{}.git",
                self.github.username, token, self.github.git_host, repo
            ),
            None => format!("https://{}/{}.git", self.github.git_host, repo),
        }
    }

    /// Run one git command in `cwd`. A non-zero exit is reported in the
    /// output, not as an error; only spawn failures and timeouts are errors.
    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, ExecutorError> {
        let step = args.first().copied().unwrap_or("git").to_string();
        let secs = self.github.git_timeout_secs;

        let run = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let out = match tokio::time::timeout(Duration::from_secs(secs), run).await {
            Err(_) => return Err(ExecutorError::Timeout { step, secs }),
            Ok(Err(e)) => return Err(ExecutorError::Io(e)),
            Ok(Ok(out)) => out,
        };

        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let ok = out.status.success();
        if !ok {
            debug!(%step, code = out.status.code().unwrap_or(-1), "git step failed");
        }
        Ok(GitOutput {
            ok,
            text: if ok || stderr.is_empty() { stdout } else { stderr },
        })
    }

    /// Like [`Self::git`] but a non-zero exit is an error.
    async fn git_checked(&self, cwd: &Path, args: &[&str]) -> Result<String, ExecutorError> {
        let out = self.git(cwd, args).await?;
        if out.ok {
            Ok(out.text)
        } else {
            Err(ExecutorError::Git {
                step: args.first().copied().unwrap_or("git").to_string(),
                output: self.redact(&out.text),
            })
        }
    }

    /// Strip the access token from git output before it is stored or logged.
    fn redact(&self, text: &str) -> String {
        match &self.github.token {
            Some(token) if !token.is_empty() => text.replace(token.as_str(), "***"),
            _ => text.to_string(),
        }
    }

    /// Unpack the archive and initialise the repository, once per job. The
    /// `origin` remote is re-pointed at the job's repository on every call.
    async fn ensure_workspace(&self, req: &CommitRequest) -> Result<PathBuf, ExecutorError> {
        let source = self.source_dir(&req.job_id);
        if !source.join(".git").is_dir() {
            let archive = self
                .archives
                .path(&req.archive_key)
                .map_err(|e| ExecutorError::Workspace(e.to_string()))?;
            let dest = source.clone();
            let files = tokio::task::spawn_blocking(move || {
                unpack_archive(&archive, &dest, MAX_UNPACKED_BYTES)
            })
            .await
            .map_err(|e| ExecutorError::Workspace(format!("unpack task failed: {e}")))??;
            info!(job_id = %req.job_id, files, "workspace unpacked");

            let user = self.github.username.as_str();
            let email = format!("{user}@users.noreply.github.com");
            self.git_checked(&source, &["init"]).await?;
            self.git_checked(&source, &["config", "user.email", &email]).await?;
            self.git_checked(&source, &["config", "user.name", user]).await?;
            self.git_checked(&source, &["config", "pull.rebase", "true"]).await?;
            self.git_checked(&source, &["config", "rebase.autoStash", "true"]).await?;
        }

        self.set_origin(&source, &req.repo).await?;
        Ok(source)
    }

    /// Make `origin` point at `repo`, adding it or rewriting its URL.
    async fn set_origin(&self, source: &Path, repo: &str) -> Result<(), ExecutorError> {
        let remote = self.remote_url(repo);
        let added = self.git(source, &["remote", "add", "origin", &remote]).await?;
        if added.ok {
            return Ok(());
        }
        if !added.text.contains("already exists") {
            return Err(ExecutorError::Git {
                step: "remote".into(),
                output: self.redact(&added.text),
            });
        }
        self.git_checked(source, &["remote", "set-url", "origin", &remote])
            .await
            .map(|_| ())
    }

    /// Stage the listed files that exist and commit them.
    async fn commit_files(&self, source: &Path, req: &CommitRequest) -> Result<usize, ExecutorError> {
        let existing: Vec<&str> = req
            .files
            .iter()
            .map(String::as_str)
            .filter(|f| source.join(f).exists())
            .collect();
        if existing.is_empty() {
            return Err(ExecutorError::NoFiles);
        }
        if existing.len() < req.files.len() {
            warn!(
                job_id = %req.job_id,
                index = req.index,
                missing = req.files.len() - existing.len(),
                "some listed files are not in the archive"
            );
        }

        for file in &existing {
            self.git_checked(source, &["add", "--", file]).await?;
        }
        self.git_checked(source, &["commit", "-m", &req.message]).await?;
        Ok(existing.len())
    }

    /// Bring the local branch in line with the remote, then push.
    async fn push(&self, source: &Path) -> Result<(), ExecutorError> {
        let branch = self.github.branch.as_str();
        let upstream = format!("origin/{branch}");

        // An empty remote has nothing to fetch; that is fine.
        self.git(source, &["fetch", "origin"]).await?;

        if self.git(source, &["rev-parse", "--verify", &upstream]).await?.ok {
            self.sync_with_remote(source, &upstream).await?;
        }

        self.git(source, &["branch", "-M", branch]).await?;

        let attempts: [&[&str]; 3] = [
            &["push", "-u", "origin", branch, "--force-with-lease"],
            &["push", "-u", "origin", branch],
            &["push", "-u", "origin", branch, "--force"],
        ];
        let mut last = String::new();
        for args in attempts {
            let out = self.git(source, args).await?;
            if out.ok {
                return Ok(());
            }
            debug!(args = ?args, "push attempt rejected");
            last = out.text;
        }
        Err(ExecutorError::Git {
            step: "push".into(),
            output: self.redact(&last),
        })
    }

    /// rebase, else merge preferring theirs, else replay our commit on the remote tip.
    async fn sync_with_remote(&self, source: &Path, upstream: &str) -> Result<(), ExecutorError> {
        if self.git(source, &["rebase", upstream]).await?.ok {
            return Ok(());
        }
        self.git(source, &["rebase", "--abort"]).await?;

        if self
            .git(source, &["merge", upstream, "--no-edit", "-X", "theirs"])
            .await?
            .ok
        {
            return Ok(());
        }
        self.git(source, &["merge", "--abort"]).await?;

        let head = self.git(source, &["rev-parse", "HEAD"]).await?;
        self.git(source, &["reset", "--hard", upstream]).await?;
        if head.ok && !head.text.is_empty() {
            let ours = head.text.as_str();
            if !self.git(source, &["cherry-pick", ours]).await?.ok {
                warn!("cherry-pick onto remote failed; keeping local commit");
                self.git(source, &["cherry-pick", "--abort"]).await?;
                self.git(source, &["reset", "--hard", ours]).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CommitExecutor for GitExecutor {
    fn name(&self) -> &str {
        "git"
    }

    #[instrument(skip(self, req), fields(job_id = %req.job_id, index = req.index, repo = %req.repo))]
    async fn execute(&self, req: &CommitRequest) -> Result<CommitReceipt, ExecutorError> {
        let source = self.ensure_workspace(req).await?;
        let staged = self.commit_files(&source, req).await?;
        self.push(&source).await?;
        info!(
            "pushed commit {}/{} ({staged} files)",
            req.index + 1,
            req.total_commits
        );
        Ok(CommitReceipt {
            summary: format!("committed {staged} files"),
        })
    }

    async fn release(&self, job_id: &str, archive_key: &str) {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(%job_id, "workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(%job_id, error = %e, "workspace cleanup failed"),
        }
        if let Err(e) = self.archives.remove(archive_key) {
            warn!(%job_id, error = %e, "archive cleanup failed");
        }
    }
}
