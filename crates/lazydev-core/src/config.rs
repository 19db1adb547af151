use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "LazyDev";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TOKEN_TTL_MINS: u64 = 1440; // 24 hours
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Top-level config (lazydev.toml + LAZYDEV_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LazydevConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed by the CORS layer (the web dashboard dev servers by default).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
        }
    }
}

/// Single-operator login. Tokens are HMAC-signed with `secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    pub secret: String,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_mins: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "change-me".to_string(),
            secret: "change-me".to_string(),
            token_ttl_mins: DEFAULT_TOKEN_TTL_MINS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where uploaded archives live until their job is terminal.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,
    /// Per-job git working trees.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub username: String,
    /// Personal access token. Without it repositories are not checked or
    /// created at submission time.
    pub token: Option<String>,
    #[serde(default = "default_github_api")]
    pub api_url: String,
    #[serde(default = "default_git_host")]
    pub git_host: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "bool_true")]
    pub create_missing_repos: bool,
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            token: None,
            api_url: default_github_api(),
            git_host: default_git_host(),
            branch: default_branch(),
            create_missing_repos: true,
            git_timeout_secs: DEFAULT_GIT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity of the command channel between the API and the engine.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long shutdown waits for in-flight pushes before giving up on them.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// When set, job events are POSTed here as JSON.
    pub webhook_url: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}
fn default_max_upload_bytes() -> usize {
    MAX_UPLOAD_BYTES
}
fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_MINS
}
fn default_github_api() -> String {
    "https://api.github.com".to_string()
}
fn default_git_host() -> String {
    "github.com".to_string()
}
fn default_branch() -> String {
    "main".to_string()
}
fn default_git_timeout() -> u64 {
    DEFAULT_GIT_TIMEOUT_SECS
}
fn default_shutdown_grace_secs() -> u64 {
    300
}
fn default_channel_capacity() -> usize {
    256
}
fn lazydev_home() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.lazydev", home)
}
fn default_db_path() -> String {
    format!("{}/lazydev.db", lazydev_home())
}
fn default_archive_dir() -> String {
    format!("{}/archives", lazydev_home())
}
fn default_work_dir() -> String {
    format!("{}/work", lazydev_home())
}

impl LazydevConfig {
    /// Load config from a TOML file with LAZYDEV_* env var overrides.
    ///
    /// Nested keys use a double underscore: `LAZYDEV_AUTH__SECRET`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(LazydevConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("LAZYDEV_").split("__"))
            .extract()
            .map_err(|e| crate::error::LazydevError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    format!("{}/lazydev.toml", lazydev_home())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = LazydevConfig::default();
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert_eq!(cfg.auth.token_ttl_mins, 1440);
        assert_eq!(cfg.github.branch, "main");
        assert!(cfg.github.token.is_none());
        assert!(cfg.notify.webhook_url.is_none());
        assert_eq!(cfg.scheduler.shutdown_grace_secs, 300);
    }

    #[test]
    fn load_merges_toml_over_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "lazydev.toml",
                r#"
                [server]
                port = 9100

                [auth]
                username = "me"
                password = "pw"
                secret = "s3cret"
                "#,
            )?;
            jail.set_env("LAZYDEV_GITHUB__BRANCH", "trunk");
            jail.set_env("LAZYDEV_SCHEDULER__SHUTDOWN_GRACE_SECS", "45");

            let cfg = LazydevConfig::load(Some("lazydev.toml")).expect("config loads");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.server.bind, DEFAULT_BIND);
            assert_eq!(cfg.auth.username, "me");
            assert_eq!(cfg.auth.token_ttl_mins, DEFAULT_TOKEN_TTL_MINS);
            assert_eq!(cfg.github.branch, "trunk");
            assert_eq!(cfg.scheduler.shutdown_grace_secs, 45);
            Ok(())
        });
    }
}
