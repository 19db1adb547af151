//! Job status endpoints: list, detail, cancel.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use lazydev_core::types::{JobDetail, JobSummary};
use lazydev_core::LazydevError;
use lazydev_store::CancelRequest;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::auth::authorize;
use crate::error::ApiResult;

/// Upper bound on `GET /jobs`.
pub const LIST_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub message: &'static str,
    pub outcome: &'static str,
}

/// GET /jobs: summaries, newest first.
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<JobSummary>>> {
    authorize(&state.signer, &headers)?;
    Ok(Json(state.store.list_jobs(LIST_LIMIT)?))
}

/// GET /jobs/{id}: summary plus ordered commit records.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<JobDetail>> {
    authorize(&state.signer, &headers)?;
    let job = state
        .store
        .get_job(&id)?
        .ok_or(LazydevError::JobNotFound { id })?;
    Ok(Json(job))
}

/// POST /jobs/{id}/cancel: record the intent and wake the scheduler.
///
/// Always acknowledged for a known job; the outcome says whether anything
/// changed.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<CancelResponse>> {
    authorize(&state.signer, &headers)?;

    let resp = match state.store.request_cancel(&id)? {
        CancelRequest::Recorded => {
            if let Err(e) = state.scheduler.cancel(&id).await {
                // The intent is persisted; restart recovery finalizes it.
                warn!(job_id = %id, error = %e, "scheduler unavailable for cancel");
            }
            info!(job_id = %id, "cancellation requested");
            CancelResponse {
                message: "Cancellation requested",
                outcome: "cancel_requested",
            }
        }
        CancelRequest::AlreadyRequested => CancelResponse {
            message: "Cancellation already requested",
            outcome: "already_requested",
        },
        CancelRequest::AlreadyTerminal => CancelResponse {
            message: "Job has already finished",
            outcome: "already_terminal",
        },
    };
    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use crate::app::tests::TestApp;
    use axum::http::StatusCode;
    use lazydev_core::types::{CommitPlan, CommitPlanEntry};

    fn plan(repo: &str, n: usize) -> CommitPlan {
        CommitPlan {
            repo: repo.into(),
            commits: (0..n)
                .map(|i| CommitPlanEntry {
                    files: vec![format!("f{i}")],
                    message: format!("c{i}"),
                    delay_mins: 5,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let app = TestApp::new();
        app.state.store.create_job("a", &plan("o/one", 1), "k").unwrap();
        app.state.store.create_job("b", &plan("o/two", 2), "k").unwrap();

        let (status, body) = app.send(app.get("/jobs")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(body[0]["status"], "pending");
        assert_eq!(body[0]["total_commits"], 2);
    }

    #[tokio::test]
    async fn detail_includes_ordered_records() {
        let app = TestApp::new();
        app.state.store.create_job("j", &plan("o/r", 3), "k").unwrap();

        let (status, body) = app.send(app.get("/jobs/j")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "j");
        let commits = body["commits"].as_array().unwrap();
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[2]["message"], "c2");
        assert_eq!(commits[0]["status"], "pending");
        // storage key stays internal
        assert!(body.get("archive_key").is_none());
    }

    #[tokio::test]
    async fn unknown_job_is_404() {
        let app = TestApp::new();
        let (status, body) = app.send(app.get("/jobs/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOB_NOT_FOUND");

        let (status, _) = app.send(app.post("/jobs/missing/cancel")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let app = TestApp::new();
        app.state.store.create_job("j", &plan("o/r", 2), "k").unwrap();

        let (status, body) = app.send(app.post("/jobs/j/cancel")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "cancel_requested");

        let (_, body) = app.send(app.post("/jobs/j/cancel")).await;
        assert_eq!(body["outcome"], "already_requested");

        let (_, body) = app.send(app.get("/jobs/j")).await;
        assert_eq!(body["cancel_requested"], true);
    }

    #[tokio::test]
    async fn cancel_of_finished_job_is_acknowledged() {
        let app = TestApp::new();
        let store = &app.state.store;
        store.create_job("j", &plan("o/r", 1), "k").unwrap();
        store.begin_commit("j", 0).unwrap();
        store.complete_commit("j", 0).unwrap();

        let (status, body) = app.send(app.post("/jobs/j/cancel")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "already_terminal");

        let (_, body) = app.send(app.get("/jobs/j")).await;
        assert_eq!(body["status"], "completed");
    }
}
