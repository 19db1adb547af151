//! Typed access to the Status API.
//!
//! [`ApiClient`] is stateless: every authenticated call takes the
//! [`Credential`] explicitly. [`Session`] layers credential ownership on top
//! and drops the credential the moment the server rejects it.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lazydev_core::types::{CommitPlan, JobDetail, JobSummary};
use reqwest::{multipart, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Bearer token issued by `POST /login`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub message: String,
    pub job_id: String,
    pub total_commits: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub message: String,
    /// `cancel_requested`, `already_requested` or `already_terminal`.
    pub outcome: String,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let resp = self
            .http
            .post(self.url("/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        let token: TokenResponse = decode(resp).await?;
        Ok(Credential::new(token.access_token))
    }

    pub async fn list_jobs(&self, cred: &Credential) -> Result<Vec<JobSummary>> {
        self.send(cred, self.http.get(self.url("/jobs"))).await
    }

    pub async fn get_job(&self, cred: &Credential, id: &str) -> Result<JobDetail> {
        self.send(cred, self.http.get(self.url(&format!("/jobs/{id}"))))
            .await
    }

    pub async fn cancel_job(&self, cred: &Credential, id: &str) -> Result<CancelResponse> {
        self.send(cred, self.http.post(self.url(&format!("/jobs/{id}/cancel"))))
            .await
    }

    pub async fn submit(
        &self,
        cred: &Credential,
        plan: &CommitPlan,
        filename: &str,
        archive: Vec<u8>,
    ) -> Result<SubmitResponse> {
        let part = multipart::Part::bytes(archive)
            .file_name(filename.to_string())
            .mime_str("application/zip")?;
        let form = multipart::Form::new()
            .text("commit_plan", serde_json::to_string(plan)?)
            .part("zip_file", part);
        self.send(cred, self.http.post(self.url("/upload")).multipart(form))
            .await
    }

    async fn send<T: DeserializeOwned>(&self, cred: &Credential, req: RequestBuilder) -> Result<T> {
        let resp = req.bearer_auth(cred.as_str()).send().await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }
    if !status.is_success() {
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = body["error"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        return Err(ClientError::Api {
            status: status.as_u16(),
            code: body["code"].as_str().map(str::to_string),
            message,
        });
    }
    Ok(resp.json().await?)
}

/// Where a watcher gets its snapshots from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, id: &str) -> Result<JobDetail>;
    async fn fetch_jobs(&self) -> Result<Vec<JobSummary>>;
}

/// An [`ApiClient`] plus the credential it currently holds.
pub struct Session {
    client: ApiClient,
    credential: Mutex<Option<Credential>>,
}

impl Session {
    pub fn new(client: ApiClient, credential: Option<Credential>) -> Self {
        Self {
            client,
            credential: Mutex::new(credential),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Credential>> {
        self.credential.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn credential(&self) -> Option<Credential> {
        self.slot().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.slot().is_some()
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let cred = self.client.login(username, password).await?;
        *self.slot() = Some(cred.clone());
        Ok(cred)
    }

    pub fn logout(&self) {
        *self.slot() = None;
    }

    fn require(&self) -> Result<Credential> {
        self.credential().ok_or(ClientError::NotAuthenticated)
    }

    /// Drop the credential if the server rejected it.
    fn observe<T>(&self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(ClientError::Unauthorized)) {
            warn!("credential rejected by server; discarding it");
            self.logout();
        }
        result
    }

    pub async fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        let cred = self.require()?;
        self.observe(self.client.list_jobs(&cred).await)
    }

    pub async fn get_job(&self, id: &str) -> Result<JobDetail> {
        let cred = self.require()?;
        self.observe(self.client.get_job(&cred, id).await)
    }

    pub async fn cancel_job(&self, id: &str) -> Result<CancelResponse> {
        let cred = self.require()?;
        self.observe(self.client.cancel_job(&cred, id).await)
    }

    pub async fn submit(
        &self,
        plan: &CommitPlan,
        filename: &str,
        archive: Vec<u8>,
    ) -> Result<SubmitResponse> {
        let cred = self.require()?;
        debug!(repo = %plan.repo, commits = plan.commits.len(), "submitting job");
        self.observe(self.client.submit(&cred, plan, filename, archive).await)
    }
}

#[async_trait]
impl JobSource for Session {
    async fn fetch_job(&self, id: &str) -> Result<JobDetail> {
        self.get_job(id).await
    }

    async fn fetch_jobs(&self) -> Result<Vec<JobSummary>> {
        self.list_jobs().await
    }
}
