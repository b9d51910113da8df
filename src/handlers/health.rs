use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::api::AppState;

/// GET /health - store connectivity
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let now = chrono::Utc::now();

    match state.repo().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": {
                        "code": "NETWORK_ERROR",
                        "message": "database unavailable",
                        "context": null
                    },
                    "data": { "status": "degraded", "timestamp": now }
                })),
            )
        }
    }
}
