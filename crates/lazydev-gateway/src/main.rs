use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lazydev_core::config::LazydevConfig;
use lazydev_scheduler::{
    GitExecutor, JobRunner, LogNotifier, MultiNotifier, SchedulerEngine, WebhookNotifier,
};
use lazydev_store::{ArchiveStore, JobStore};
use tracing::{info, warn};

mod app;
mod auth;
mod error;
mod github;
mod http;

#[derive(Parser)]
#[command(name = "lazydev-gateway", version, about = "Time-spread commit scheduler API")]
struct Cli {
    /// Config file (default: $LAZYDEV_CONFIG, then ~/.lazydev/lazydev.toml)
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lazydev_gateway=info,lazydev_scheduler=info,lazydev_store=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > LAZYDEV_CONFIG env > ~/.lazydev/lazydev.toml
    let config_path = cli.config.or_else(|| std::env::var("LAZYDEV_CONFIG").ok());
    let config = LazydevConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        LazydevConfig::default()
    });
    if config.auth.secret == LazydevConfig::default().auth.secret {
        warn!("auth.secret is the built-in default; set LAZYDEV_AUTH__SECRET");
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(JobStore::new(db)?);

    std::fs::create_dir_all(&config.storage.archive_dir)?;
    std::fs::create_dir_all(&config.storage.work_dir)?;
    let archives = ArchiveStore::new(&config.storage.archive_dir);

    let executor = Arc::new(GitExecutor::new(
        config.github.clone(),
        &config.storage.work_dir,
        archives.clone(),
    ));
    let mut notifier = MultiNotifier::new().with(Arc::new(LogNotifier));
    if let Some(url) = &config.notify.webhook_url {
        info!(%url, "job notifications enabled");
        notifier = notifier.with(Arc::new(WebhookNotifier::new(url.clone())));
    }
    if config.github.token.is_none() {
        warn!("github.token not set; repositories will not be checked and pushes may fail");
    }

    let runner = Arc::new(JobRunner::new(store.clone(), executor, Arc::new(notifier)));
    let (engine, scheduler) =
        SchedulerEngine::new(store.clone(), runner, config.scheduler.channel_capacity);
    let engine =
        engine.with_shutdown_grace(Duration::from_secs(config.scheduler.shutdown_grace_secs));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store, archives, scheduler));
    let router = app::build_router(state);

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    info!("LazyDev gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal scheduler to stop; it lets in-flight pushes finish first
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler engine task failed: {e}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler failed: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
