//! Repository existence check and creation on the GitHub REST API.

use lazydev_core::config::GithubConfig;
use lazydev_core::{LazydevError, Result};
use reqwest::StatusCode;
use serde_json::json;
use tracing::{info, warn};

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    create_missing: bool,
}

impl GithubClient {
    /// `None` when no token is configured; submissions then skip the check.
    pub fn from_config(cfg: &GithubConfig) -> Option<Self> {
        let token = cfg.token.clone().filter(|t| !t.is_empty())?;
        Some(Self {
            http: reqwest::Client::new(),
            api_url: cfg.api_url.trim_end_matches('/').to_string(),
            token,
            create_missing: cfg.create_missing_repos,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.api_url))
            .header("Authorization", format!("token {}", self.token))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "lazydev")
            .timeout(std::time::Duration::from_secs(15))
    }

    /// Make sure `owner/name` exists, creating it (public, empty) if allowed.
    pub async fn ensure_repo(&self, repo: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/repos/{repo}"))
            .send()
            .await
            .map_err(|e| LazydevError::Upstream(format!("GitHub request failed: {e}")))?;

        match resp.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND if self.create_missing => {}
            StatusCode::NOT_FOUND => {
                return Err(LazydevError::validation(format!(
                    "repository does not exist: {repo}"
                )))
            }
            status => {
                warn!(%repo, %status, "unexpected GitHub response");
                return Err(LazydevError::validation(format!(
                    "could not verify repository {repo}: GitHub returned {status}"
                )));
            }
        }

        let name = repo.rsplit('/').next().unwrap_or(repo);
        let resp = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&json!({ "name": name, "private": false, "auto_init": false }))
            .send()
            .await
            .map_err(|e| LazydevError::Upstream(format!("GitHub request failed: {e}")))?;

        if resp.status() == StatusCode::CREATED {
            info!(%repo, "repository created");
            Ok(())
        } else {
            warn!(%repo, status = %resp.status(), "repository creation refused");
            Err(LazydevError::validation(format!(
                "Failed to create repository: {repo}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_token() {
        assert!(GithubClient::from_config(&GithubConfig::default()).is_none());

        let cfg = GithubConfig {
            token: Some(String::new()),
            ..Default::default()
        };
        assert!(GithubClient::from_config(&cfg).is_none());

        let cfg = GithubConfig {
            token: Some("ghp_x".into()),
            api_url: "https://api.github.com/".into(),
            ..Default::default()
        };
        let client = GithubClient::from_config(&cfg).unwrap();
        assert_eq!(client.api_url, "https://api.github.com");
    }
}
