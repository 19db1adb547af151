use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lazydev_core::LazydevError;
use serde_json::json;
use tracing::error;

use crate::auth::AuthError;

/// Handler error: any [`LazydevError`] rendered as `{"error", "code"}`.
#[derive(Debug)]
pub struct ApiError(pub LazydevError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            LazydevError::Validation(_) => StatusCode::BAD_REQUEST,
            LazydevError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            LazydevError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), "request failed: {}", self.0);
        }
        let body = Json(json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}

impl From<LazydevError> for ApiError {
    fn from(e: LazydevError) -> Self {
        Self(e)
    }
}

impl From<lazydev_store::StoreError> for ApiError {
    fn from(e: lazydev_store::StoreError) -> Self {
        Self(e.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self(LazydevError::Unauthorized(e.to_string()))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
