pub mod auth;
pub mod response;

pub use auth::caller_auth_middleware;
pub use response::{ApiResponse, ApiResult, BulkResponse, BulkSummary};
