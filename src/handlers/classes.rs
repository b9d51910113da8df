use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::models::{ClassChanges, ClassEntity};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{ClassList, ClassListParams, CreateClass};
use crate::types::CallerContext;

use super::parse_body;

/// GET /api/classes - live classes visible to the caller
pub async fn list(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Query(params): Query<ClassListParams>,
) -> ApiResult<ClassList> {
    let list = state.classes().list_classes(&caller, params).await?;
    Ok(ApiResponse::success(list))
}

/// POST /api/classes
pub async fn create(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Json(body): Json<Value>,
) -> ApiResult<ClassEntity> {
    let data: CreateClass = parse_body(body)?;
    let class = state.classes().create_class(&caller, data).await?;
    Ok(ApiResponse::created(class))
}

/// GET /api/classes/:id
pub async fn show(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<ClassEntity> {
    let class = state.classes().get_class(&caller, id).await?;
    Ok(ApiResponse::success(class))
}

/// PATCH /api/classes/:id
pub async fn update(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> ApiResult<ClassEntity> {
    let changes: ClassChanges = parse_body(body)?;
    let class = state.classes().update_class(&caller, id, &changes).await?;
    Ok(ApiResponse::success(class))
}
