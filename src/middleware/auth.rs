use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::api::AppState;
use crate::auth::validate_jwt;
use crate::error::ApiError;

/// Authenticate the bearer token and resolve the caller.
///
/// The token only carries the caller id. School and role come from the
/// access gate, and the resolved `CallerContext` is inserted into the
/// request extensions for handlers.
pub async fn caller_auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_jwt_from_headers(&headers)
        .map_err(|msg| ApiError::unauthorized(msg).into_response())?;

    let claims = validate_jwt(&token, state.jwt_secret())
        .map_err(|e| ApiError::unauthorized(e.to_string()).into_response())?;

    let caller = state
        .gate()
        .resolve_caller(claims.sub)
        .await
        .map_err(|e| ApiError::from(e).into_response())?;

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get("authorization")
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err("Empty JWT token".to_string()),
        None => Err("Authorization header must use Bearer token format".to_string()),
    }
}
