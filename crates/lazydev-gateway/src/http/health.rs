use axum::Json;
use lazydev_core::config::APP_NAME;
use serde_json::{json, Value};

/// GET /health: liveness probe, returns server metadata.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "app": APP_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
