use axum::{extract::State, Extension, Json};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::models::{ClassChanges, ClassEntity};
use crate::middleware::{ApiResponse, ApiResult, BulkResponse};
use crate::types::{AccessOperation, CallerContext};

use super::{id_list, parse_body};

#[derive(Debug, Deserialize)]
struct UpdateBody {
    changes: ClassChanges,
}

#[derive(Debug, Deserialize)]
struct ReassignBody {
    teacher_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct AccessBody {
    #[serde(default = "default_operation")]
    operation: AccessOperation,
}

fn default_operation() -> AccessOperation {
    AccessOperation::Update
}

/// POST /api/classes/bulk/update - `{ class_ids, changes }`
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let class_ids = id_list(&body, "class_ids")?;
    let UpdateBody { changes } = parse_body(body)?;
    let outcome = state.bulk().bulk_update(&caller, &class_ids, &changes).await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// POST /api/classes/bulk/delete - `{ class_ids }`
pub async fn soft_delete(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let class_ids = id_list(&body, "class_ids")?;
    let outcome = state.bulk().bulk_soft_delete(&caller, &class_ids).await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// POST /api/classes/bulk/restore - `{ class_ids }`
pub async fn restore(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let class_ids = id_list(&body, "class_ids")?;
    let outcome = state.bulk().bulk_restore(&caller, &class_ids).await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// POST /api/classes/bulk/reassign - `{ class_ids, teacher_id }`
pub async fn reassign(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<BulkResponse<Uuid>> {
    let class_ids = id_list(&body, "class_ids")?;
    let ReassignBody { teacher_id } = parse_body(body)?;
    let outcome = state
        .bulk()
        .bulk_reassign_teacher(&caller, &class_ids, teacher_id)
        .await?;
    Ok(ApiResponse::success(outcome.into()))
}

/// POST /api/classes/bulk/access - `{ class_ids, operation? }`
pub async fn access(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<Vec<ClassEntity>> {
    let class_ids = id_list(&body, "class_ids")?;
    let AccessBody { operation } = parse_body(body)?;
    let classes = state.bulk().preflight_access(&caller, &class_ids, operation).await?;
    Ok(ApiResponse::success(classes))
}
