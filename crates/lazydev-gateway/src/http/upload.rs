//! POST /upload: multipart submission of an archive plus its commit plan.
//!
//! Fields: `zip_file` (the archive) and `commit_plan` (JSON). Everything is
//! validated before a job exists; a rejected submission leaves no trace.

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    Json,
};
use lazydev_core::plan::validate_archive;
use lazydev_core::types::CommitPlan;
use lazydev_core::LazydevError;
use lazydev_store::ArchiveStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::authorize;
use crate::error::ApiResult;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: &'static str,
    pub job_id: String,
    pub total_commits: usize,
}

struct Submission {
    filename: String,
    archive: Vec<u8>,
    plan: String,
}

pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> ApiResult<Json<UploadResponse>> {
    authorize(&state.signer, request.headers())?;

    let multipart = Multipart::from_request(request, &state)
        .await
        .map_err(|e| LazydevError::validation(format!("invalid multipart body: {e}")))?;
    let sub = read_submission(multipart).await?;

    let plan = CommitPlan::from_json(&sub.plan)?;
    plan.validate()?;
    validate_archive(&sub.filename, &sub.archive)?;

    if let Some(github) = &state.github {
        github.ensure_repo(&plan.repo).await?;
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    let key = ArchiveStore::key_for(&job_id);
    state.archives.save(&key, &sub.archive)?;

    let job = match state.store.create_job(&job_id, &plan, &key) {
        Ok(job) => job,
        Err(e) => {
            let _ = state.archives.remove(&key);
            return Err(e.into());
        }
    };

    if let Err(e) = state.scheduler.enqueue(&job_id).await {
        // Persisted as pending; picked up by restart recovery.
        warn!(%job_id, error = %e, "scheduler unavailable for new job");
    }

    info!(
        %job_id,
        repo = %plan.repo,
        commits = plan.commits.len(),
        bytes = sub.archive.len(),
        "job submitted"
    );
    Ok(Json(UploadResponse {
        message: "Job created successfully",
        job_id,
        total_commits: job.commits.len(),
    }))
}

async fn read_submission(mut multipart: Multipart) -> Result<Submission, LazydevError> {
    let mut archive: Option<(String, Vec<u8>)> = None;
    let mut plan: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| LazydevError::validation(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("zip_file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| LazydevError::validation(format!("could not read zip_file: {e}")))?;
                archive = Some((filename, bytes.to_vec()));
            }
            Some("commit_plan") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| LazydevError::validation(format!("could not read commit_plan: {e}")))?;
                plan = Some(text);
            }
            _ => {}
        }
    }

    let (filename, archive) =
        archive.ok_or_else(|| LazydevError::validation("missing field: zip_file"))?;
    let plan = plan.ok_or_else(|| LazydevError::validation("missing field: commit_plan"))?;
    Ok(Submission {
        filename,
        archive,
        plan,
    })
}

#[cfg(test)]
mod tests {
    use crate::app::tests::TestApp;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use lazydev_store::ArchiveStore;
    use serde_json::json;

    const BOUNDARY: &str = "lazydev-test-boundary";

    fn multipart(plan: &str, filename: &str, archive: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"commit_plan\"\r\n\r\n{plan}\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"zip_file\"; filename=\"{filename}\"\r\nContent-Type: application/zip\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(archive);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(app: &TestApp, body: Vec<u8>) -> Request<Body> {
        Request::post("/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", app.token()))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn valid_plan() -> String {
        json!({
            "repo": "octo/site",
            "commits": [
                {"files": ["README.md"], "message": "init"},
                {"files": ["src/main.rs"], "message": "add main", "delay_mins": 30}
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn accepts_valid_submission() {
        let app = TestApp::new();
        let body = multipart(&valid_plan(), "site.zip", b"PK\x03\x04payload");
        let (status, resp) = app.send(upload(&app, body)).await;
        assert_eq!(status, StatusCode::OK, "{resp}");
        assert_eq!(resp["message"], "Job created successfully");
        assert_eq!(resp["total_commits"], 2);

        let id = resp["job_id"].as_str().unwrap();
        let job = app.state.store.get_job(id).unwrap().unwrap();
        assert_eq!(job.summary.repo, "octo/site");
        assert_eq!(job.commits[0].delay_mins, 0);
        assert_eq!(job.commits[1].delay_mins, 30);

        let saved = app
            .state
            .archives
            .path(&ArchiveStore::key_for(id))
            .unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"PK\x03\x04payload");
    }

    #[tokio::test]
    async fn rejects_invalid_plans_without_creating_jobs() {
        let app = TestApp::new();
        let cases = [
            "not json".to_string(),
            json!({"repo": "octo/site", "commits": []}).to_string(),
            json!({"repo": "no-slash", "commits": [{"files": ["a"], "message": "m"}]}).to_string(),
            json!({"repo": "octo/site", "commits": [{"files": [], "message": "m"}]}).to_string(),
            json!({"repo": "octo/site", "commits": [{"files": ["a"], "message": "  "}]}).to_string(),
            json!({"repo": "octo/site", "commits": [{"files": ["../x"], "message": "m"}]}).to_string(),
        ];
        for plan in cases {
            let body = multipart(&plan, "site.zip", b"PK\x03\x04payload");
            let (status, resp) = app.send(upload(&app, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{plan}");
            assert_eq!(resp["code"], "VALIDATION_ERROR");
        }
        assert!(app.state.store.list_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_bad_archives() {
        let app = TestApp::new();
        for (name, bytes) in [
            ("site.tar", &b"PK\x03\x04payload"[..]),
            ("site.zip", &b""[..]),
            ("site.zip", &b"hello world"[..]),
        ] {
            let body = multipart(&valid_plan(), name, bytes);
            let (status, _) = app.send(upload(&app, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{name}");
        }
        assert!(app.state.store.list_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_field_is_rejected() {
        let app = TestApp::new();
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"commit_plan\"\r\n\r\n{}\r\n--{BOUNDARY}--\r\n",
            valid_plan()
        );
        let (status, resp) = app.send(upload(&app, body.into_bytes())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(resp["error"].as_str().unwrap().contains("zip_file"));
    }
}
