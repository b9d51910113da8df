use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::models::EnrollmentRecord;
use crate::middleware::{ApiResponse, ApiResult, BulkResponse};
use crate::services::{AvailableStudents, AvailableStudentsFilter, BulkEnrollStudents, EnrollStudent};
use crate::types::CallerContext;

use super::{id_list, parse_body};

#[derive(Debug, Deserialize)]
struct BulkEnrollBody {
    enrollment_date: Option<DateTime<Utc>>,
    notes: Option<String>,
}

/// GET /api/classes/:id/students - enrollment roster
pub async fn roster(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(class_id): Path<Uuid>,
) -> ApiResult<Vec<EnrollmentRecord>> {
    let records = state.enrollment().list_enrolled_students(&caller, class_id).await?;
    Ok(ApiResponse::success(records))
}

/// POST /api/classes/:id/students - `{ student_id, enrollment_date?, notes? }`
pub async fn enroll(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<EnrollmentRecord> {
    let data: EnrollStudent = parse_body(body)?;
    let record = state.enrollment().enroll_student(&caller, class_id, data).await?;
    Ok(ApiResponse::created(record))
}

/// POST /api/classes/:id/students/bulk - `{ student_ids, enrollment_date?, notes? }`
pub async fn bulk_enroll(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let student_ids = id_list(&body, "student_ids")?;
    let BulkEnrollBody { enrollment_date, notes } = parse_body(body)?;
    let data = BulkEnrollStudents {
        student_ids,
        enrollment_date,
        notes,
    };
    let outcome = state.enrollment().bulk_enroll_students(&caller, class_id, data).await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// POST /api/classes/:id/students/remove - `{ student_ids }`
pub async fn bulk_remove(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(class_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let student_ids = id_list(&body, "student_ids")?;
    let outcome = state
        .enrollment()
        .bulk_remove_students(&caller, class_id, &student_ids)
        .await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// DELETE /api/classes/:id/students/:student_id
pub async fn remove(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path((class_id, student_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<EnrollmentRecord> {
    let record = state.enrollment().remove_student(&caller, class_id, student_id).await?;
    Ok(ApiResponse::success(record))
}

/// GET /api/classes/:id/available-students - students not yet enrolled
pub async fn available(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(class_id): Path<Uuid>,
    Query(filter): Query<AvailableStudentsFilter>,
) -> ApiResult<AvailableStudents> {
    let result = state
        .enrollment()
        .get_available_students(&caller, class_id, filter)
        .await?;
    Ok(ApiResponse::success(result))
}
