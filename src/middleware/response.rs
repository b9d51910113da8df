use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::types::BulkOutcome;

/// Wrapper for API responses that automatically adds the success envelope
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub status_code: StatusCode,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self::with_status(data, StatusCode::OK)
    }

    pub fn with_status(data: T, status_code: StatusCode) -> Self {
        Self { data, status_code }
    }

    pub fn created(data: T) -> Self {
        Self::with_status(data, StatusCode::CREATED)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let data = match serde_json::to_value(&self.data) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize response data: {}", e);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "success": false,
                        "error": {
                            "code": "UNEXPECTED_ERROR",
                            "message": "Failed to serialize response data",
                            "context": null
                        }
                    })),
                )
                    .into_response();
            }
        };

        (self.status_code, Json(json!({ "success": true, "data": data }))).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Bulk outcome plus counts, so callers can render "added 8 of 10"
#[derive(Debug, Serialize)]
pub struct BulkResponse<T: Serialize> {
    #[serde(flatten)]
    pub outcome: BulkOutcome<T>,
    pub summary: BulkSummary,
}

impl<T: Serialize> From<BulkOutcome<T>> for BulkResponse<T> {
    fn from(outcome: BulkOutcome<T>) -> Self {
        let summary = BulkSummary {
            total: outcome.len(),
            succeeded: outcome.succeeded.len(),
            failed: outcome.failed.len(),
        };
        Self { outcome, summary }
    }
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;
