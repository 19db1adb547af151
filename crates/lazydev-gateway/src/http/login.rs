//! POST /login: exchange the operator credentials for a bearer token.

use axum::{extract::State, Json};
use chrono::Utc;
use lazydev_core::LazydevError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    let auth = &state.config.auth;
    if req.username != auth.username || req.password != auth.password {
        warn!(username = %req.username, "login rejected");
        return Err(LazydevError::Unauthorized("Invalid credentials".into()).into());
    }

    info!(username = %req.username, "login");
    Ok(Json(TokenResponse {
        access_token: state.signer.issue(&req.username, Utc::now()),
        token_type: "bearer",
    }))
}
