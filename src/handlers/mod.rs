pub mod bulk;
pub mod classes;
pub mod enrollment;
pub mod health;

use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::sanitize::clean_uuid_list;

pub(crate) fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

/// Id array from a raw body field. Malformed elements are dropped by the
/// sanitizer rather than failing the request.
pub(crate) fn id_list(body: &Value, field: &str) -> Result<Vec<Uuid>, ApiError> {
    match body.get(field) {
        Some(Value::Array(items)) => Ok(clean_uuid_list(items)),
        _ => Err(ApiError::bad_request(format!("'{}' must be an array of ids", field))),
    }
}
