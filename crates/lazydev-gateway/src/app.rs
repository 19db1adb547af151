use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use lazydev_core::config::LazydevConfig;
use lazydev_scheduler::SchedulerHandle;
use lazydev_store::{ArchiveStore, JobStore};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::auth::TokenSigner;
use crate::github::GithubClient;

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: LazydevConfig,
    pub store: Arc<JobStore>,
    pub archives: ArchiveStore,
    pub scheduler: SchedulerHandle,
    pub signer: TokenSigner,
    /// Present only when a GitHub token is configured.
    pub github: Option<GithubClient>,
}

impl AppState {
    pub fn new(
        config: LazydevConfig,
        store: Arc<JobStore>,
        archives: ArchiveStore,
        scheduler: SchedulerHandle,
    ) -> Self {
        let signer = TokenSigner::new(&config.auth.secret, config.auth.token_ttl_mins);
        let github = GithubClient::from_config(&config.github);
        Self {
            config,
            store,
            archives,
            scheduler,
            signer,
            github,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/login", post(crate::http::login::login_handler))
        .route("/upload", post(crate::http::upload::upload_handler))
        .route("/jobs", get(crate::http::jobs::list_jobs))
        .route("/jobs/{id}", get(crate::http::jobs::get_job))
        .route("/jobs/{id}/cancel", post(crate::http::jobs::cancel_job))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
    };
    use lazydev_scheduler::{
        CommitExecutor, CommitReceipt, CommitRequest, ExecutorError, JobRunner, LogNotifier,
        SchedulerEngine,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct NoopExecutor;

    #[async_trait]
    impl CommitExecutor for NoopExecutor {
        fn name(&self) -> &str {
            "noop"
        }
        async fn execute(&self, _req: &CommitRequest) -> Result<CommitReceipt, ExecutorError> {
            Ok(CommitReceipt::default())
        }
    }

    /// Router over an in-memory store. The engine is built but never run,
    /// so submitted jobs stay `pending`.
    pub(crate) struct TestApp {
        pub state: Arc<AppState>,
        pub router: Router,
        _engine: SchedulerEngine,
        _dir: tempfile::TempDir,
    }

    impl TestApp {
        pub fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = LazydevConfig::default();
            config.auth.username = "admin".into();
            config.auth.password = "pw".into();
            config.auth.secret = "test-secret".into();

            let store = Arc::new(JobStore::open_in_memory().unwrap());
            let archives = ArchiveStore::new(dir.path());
            let runner = Arc::new(JobRunner::new(
                store.clone(),
                Arc::new(NoopExecutor),
                Arc::new(LogNotifier),
            ));
            let (engine, handle) = SchedulerEngine::new(store.clone(), runner, 16);
            let state = Arc::new(AppState::new(config, store, archives, handle));
            let router = build_router(state.clone());
            Self {
                state,
                router,
                _engine: engine,
                _dir: dir,
            }
        }

        pub fn token(&self) -> String {
            self.state.signer.issue("admin", chrono::Utc::now())
        }

        pub async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp: Response = self.router.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, body)
        }

        pub fn get(&self, uri: &str) -> Request<Body> {
            Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token()))
                .body(Body::empty())
                .unwrap()
        }

        pub fn post(&self, uri: &str) -> Request<Body> {
            Request::post(uri)
                .header(header::AUTHORIZATION, format!("Bearer {}", self.token()))
                .body(Body::empty())
                .unwrap()
        }
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let app = TestApp::new();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["app"], "LazyDev");
    }

    #[tokio::test]
    async fn login_issues_usable_token() {
        let app = TestApp::new();
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"username": "admin", "password": "pw"}).to_string()))
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["token_type"], "bearer");

        let token = body["access_token"].as_str().unwrap();
        let req = Request::get("/jobs")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials() {
        let app = TestApp::new();
        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"username": "admin", "password": "nope"}).to_string()))
            .unwrap();
        let (status, body) = app.send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn job_routes_require_token() {
        let app = TestApp::new();
        for (method, uri) in [
            ("GET", "/jobs"),
            ("GET", "/jobs/x"),
            ("POST", "/jobs/x/cancel"),
            ("POST", "/upload"),
        ] {
            let req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, "Bearer forged.1.00")
                .body(Body::empty())
                .unwrap();
            let (status, _) = app.send(req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn cors_preflight_allows_dashboard_origin() {
        let app = TestApp::new();
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/jobs")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .and_then(|v| v.to_str().ok()),
            Some("http://localhost:5173")
        );
    }
}
