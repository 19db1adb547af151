use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lazydev_client::{ApiClient, ClientError, Credential, JobWatcher, Session};
use lazydev_core::types::{CommitPlan, CommitPlanEntry, JobDetail, JobSummary};

#[derive(Parser)]
#[command(name = "lazydev", version, about = "Submit and follow time-spread commit jobs")]
struct Cli {
    /// API base URL
    #[arg(long, default_value = "http://localhost:8000")]
    server: String,

    /// Where the login token is kept (default: ~/.lazydev/token)
    #[arg(long)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the token
    Login {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// List jobs, newest first
    Jobs,
    /// Show one job and its commits
    Show { id: String },
    /// Follow a job until it finishes
    Watch { id: String },
    /// Request cancellation of a job
    Cancel { id: String },
    /// Submit an archive with a commit plan (JSON array of {files, message, delay_mins})
    Submit {
        #[arg(long)]
        repo: String,
        #[arg(long)]
        archive: PathBuf,
        #[arg(long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lazydev_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let token_file = cli.token_file.clone().unwrap_or_else(default_token_file);
    let session = Arc::new(Session::new(
        ApiClient::new(&cli.server),
        read_token(&token_file),
    ));

    let result = run(cli.command, &session, &token_file).await;
    if let Err(e) = &result {
        if e.downcast_ref::<ClientError>().is_some_and(ClientError::needs_login) {
            // the session already dropped it in memory
            let _ = std::fs::remove_file(&token_file);
            bail!("{e}; run `lazydev login` again");
        }
    }
    result
}

async fn run(command: Command, session: &Arc<Session>, token_file: &Path) -> anyhow::Result<()> {
    match command {
        Command::Login { username, password } => {
            let cred = session.login(&username, &password).await?;
            write_token(token_file, &cred)?;
            println!("Logged in as {username}");
        }
        Command::Jobs => {
            let jobs = session.list_jobs().await?;
            if jobs.is_empty() {
                println!("No jobs yet");
            }
            for job in &jobs {
                print_summary(job);
            }
        }
        Command::Show { id } => {
            let job = session.get_job(&id).await?;
            print_detail(&job);
        }
        Command::Watch { id } => watch(session.clone(), id).await?,
        Command::Cancel { id } => {
            let resp = session.cancel_job(&id).await?;
            println!("{} ({})", resp.message, resp.outcome);
        }
        Command::Submit { repo, archive, plan } => {
            let raw = std::fs::read_to_string(&plan)
                .with_context(|| format!("reading {}", plan.display()))?;
            let commits: Vec<CommitPlanEntry> =
                serde_json::from_str(&raw).context("plan must be a JSON array of commits")?;
            let plan = CommitPlan { repo, commits };
            plan.validate()?;

            let bytes = std::fs::read(&archive)
                .with_context(|| format!("reading {}", archive.display()))?;
            let filename = archive
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("source.zip");
            let resp = session.submit(&plan, filename, bytes).await?;
            println!(
                "{}: job {} with {} commits",
                resp.message, resp.job_id, resp.total_commits
            );
        }
    }
    Ok(())
}

async fn watch(session: Arc<Session>, id: String) -> anyhow::Result<()> {
    let watcher = JobWatcher::spawn(session, id);
    let mut rx = watcher.subscribe();
    let mut last_line = String::new();

    loop {
        let view = rx.borrow_and_update().clone();
        if let Some(job) = &view.job {
            let countdown = view
                .countdown
                .map(|c| format!(" | next commit: {c}"))
                .unwrap_or_default();
            let line = format!(
                "{} {}/{} commits{countdown}",
                job.status(),
                job.summary.completed_commits,
                job.summary.total_commits
            );
            if line != last_line {
                println!("{line}");
                last_line = line;
            }
        }
        if let Some(err) = &view.error {
            eprintln!("warning: {err}");
        }
        if view.unauthorized {
            watcher.stop().await;
            return Err(ClientError::Unauthorized.into());
        }
        if view.is_final() {
            if let Some(job) = &view.job {
                print_detail(job);
            }
            break;
        }

        tokio::select! {
            changed = rx.changed() => if changed.is_err() { break },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    watcher.stop().await;
    Ok(())
}

fn print_summary(job: &JobSummary) {
    println!(
        "{}  {:<12} {:<30} {}/{}  {}",
        job.id,
        job.status.as_str(),
        job.repo,
        job.completed_commits,
        job.total_commits,
        job.created_at.format("%Y-%m-%d %H:%M"),
    );
}

fn print_detail(job: &JobDetail) {
    print_summary(&job.summary);
    if let Some(err) = &job.summary.error {
        println!("  error: {err}");
    }
    for c in &job.commits {
        let when = c
            .committed_at
            .map(|t| format!(" at {}", t.format("%H:%M:%S")))
            .unwrap_or_default();
        let delay = if c.index == 0 {
            "immediate".to_string()
        } else {
            format!("+{}m", c.delay_mins)
        };
        println!(
            "  #{:<3} {:<11} {:<10} {}{when}",
            c.index,
            c.status.as_str(),
            delay,
            c.message
        );
    }
}

fn default_token_file() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".lazydev").join("token")
}

fn read_token(path: &Path) -> Option<Credential> {
    let raw = std::fs::read_to_string(path).ok()?;
    let raw = raw.trim();
    (!raw.is_empty()).then(|| Credential::new(raw))
}

fn write_token(path: &Path, cred: &Credential) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, cred.as_str())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
