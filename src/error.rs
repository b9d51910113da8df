// Enrollment error taxonomy and HTTP API error mapping
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::database::manager::DatabaseError;

/// Machine-readable error codes. Callers branch on these, never on messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    AccessDenied,
    UnauthorizedAccess,
    ClassNotFound,
    TeacherNotFound,
    StudentNotFound,
    StudentAlreadyEnrolled,
    StudentNotEnrolled,
    ClassCapacityExceeded,
    CrossSchoolEnrollment,
    SchoolMismatch,
    ClassHasStudents,
    DuplicateClassName,
    InvalidInput,
    NetworkError,
    UnexpectedError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::AccessDenied => "ACCESS_DENIED",
            ErrorKind::UnauthorizedAccess => "UNAUTHORIZED_ACCESS",
            ErrorKind::ClassNotFound => "CLASS_NOT_FOUND",
            ErrorKind::TeacherNotFound => "TEACHER_NOT_FOUND",
            ErrorKind::StudentNotFound => "STUDENT_NOT_FOUND",
            ErrorKind::StudentAlreadyEnrolled => "STUDENT_ALREADY_ENROLLED",
            ErrorKind::StudentNotEnrolled => "STUDENT_NOT_ENROLLED",
            ErrorKind::ClassCapacityExceeded => "CLASS_CAPACITY_EXCEEDED",
            ErrorKind::CrossSchoolEnrollment => "CROSS_SCHOOL_ENROLLMENT",
            ErrorKind::SchoolMismatch => "SCHOOL_MISMATCH",
            ErrorKind::ClassHasStudents => "CLASS_HAS_STUDENTS",
            ErrorKind::DuplicateClassName => "DUPLICATE_CLASS_NAME",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::UnexpectedError => "UNEXPECTED_ERROR",
        }
    }

    /// Parse a code as returned by the atomic enroll stored function.
    /// Unknown codes degrade to `UnexpectedError`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "ACCESS_DENIED" => ErrorKind::AccessDenied,
            "UNAUTHORIZED_ACCESS" => ErrorKind::UnauthorizedAccess,
            "CLASS_NOT_FOUND" => ErrorKind::ClassNotFound,
            "TEACHER_NOT_FOUND" => ErrorKind::TeacherNotFound,
            "STUDENT_NOT_FOUND" => ErrorKind::StudentNotFound,
            "STUDENT_ALREADY_ENROLLED" => ErrorKind::StudentAlreadyEnrolled,
            "STUDENT_NOT_ENROLLED" => ErrorKind::StudentNotEnrolled,
            "CLASS_CAPACITY_EXCEEDED" => ErrorKind::ClassCapacityExceeded,
            "CROSS_SCHOOL_ENROLLMENT" => ErrorKind::CrossSchoolEnrollment,
            "SCHOOL_MISMATCH" => ErrorKind::SchoolMismatch,
            "CLASS_HAS_STUDENTS" => ErrorKind::ClassHasStudents,
            "DUPLICATE_CLASS_NAME" => ErrorKind::DuplicateClassName,
            "INVALID_INPUT" => ErrorKind::InvalidInput,
            "NETWORK_ERROR" => ErrorKind::NetworkError,
            _ => ErrorKind::UnexpectedError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors raised by the enrollment engine
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("Access denied to class(es) {}: {reason}", join_ids(.class_ids))]
    AccessDenied { class_ids: Vec<Uuid>, reason: String },

    #[error("Unauthorized access to class(es) {}: {reason}", join_ids(.class_ids))]
    UnauthorizedAccess { class_ids: Vec<Uuid>, reason: String },

    #[error("Class not found: {0}")]
    ClassNotFound(Uuid),

    #[error("Teacher profile not found: {0}")]
    TeacherNotFound(Uuid),

    #[error("Student not found: {0}")]
    StudentNotFound(Uuid),

    #[error("Student {student_id} is already enrolled in class {class_id}")]
    StudentAlreadyEnrolled { class_id: Uuid, student_id: Uuid },

    #[error("Student {student_id} is not enrolled in class {class_id}")]
    StudentNotEnrolled { class_id: Uuid, student_id: Uuid },

    #[error("Class {class_id} is at capacity ({capacity} students)")]
    ClassCapacityExceeded { class_id: Uuid, capacity: i32 },

    #[error("Enrollment across schools is not allowed (class school {class_school}, caller school {caller_school})")]
    CrossSchoolEnrollment { class_school: Uuid, caller_school: Uuid },

    /// Per-student tenant violation reported by the atomic enroll
    #[error("Student {student_id} belongs to another school than class {class_id}")]
    StudentFromOtherSchool { class_id: Uuid, student_id: Uuid },

    #[error("Teacher school {teacher_school} does not match class school {class_school}")]
    SchoolMismatch { class_school: Uuid, teacher_school: Uuid },

    #[error("Class {class_id} still has {enrolled} enrolled student(s)")]
    ClassHasStudents { class_id: Uuid, enrolled: i64 },

    #[error("A class named '{name}' already exists in school {school_id}")]
    DuplicateClassName { school_id: Uuid, name: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected error: {context}")]
    Unexpected {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter().map(Uuid::to_string).collect::<Vec<_>>().join(", ")
}

impl EnrollmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnrollmentError::AccessDenied { .. } => ErrorKind::AccessDenied,
            EnrollmentError::UnauthorizedAccess { .. } => ErrorKind::UnauthorizedAccess,
            EnrollmentError::ClassNotFound(_) => ErrorKind::ClassNotFound,
            EnrollmentError::TeacherNotFound(_) => ErrorKind::TeacherNotFound,
            EnrollmentError::StudentNotFound(_) => ErrorKind::StudentNotFound,
            EnrollmentError::StudentAlreadyEnrolled { .. } => ErrorKind::StudentAlreadyEnrolled,
            EnrollmentError::StudentNotEnrolled { .. } => ErrorKind::StudentNotEnrolled,
            EnrollmentError::ClassCapacityExceeded { .. } => ErrorKind::ClassCapacityExceeded,
            EnrollmentError::CrossSchoolEnrollment { .. } | EnrollmentError::StudentFromOtherSchool { .. } => {
                ErrorKind::CrossSchoolEnrollment
            }
            EnrollmentError::SchoolMismatch { .. } => ErrorKind::SchoolMismatch,
            EnrollmentError::ClassHasStudents { .. } => ErrorKind::ClassHasStudents,
            EnrollmentError::DuplicateClassName { .. } => ErrorKind::DuplicateClassName,
            EnrollmentError::InvalidInput(_) => ErrorKind::InvalidInput,
            EnrollmentError::Network(_) => ErrorKind::NetworkError,
            EnrollmentError::Unexpected { .. } => ErrorKind::UnexpectedError,
        }
    }

    pub fn unexpected(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        EnrollmentError::Unexpected {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Convert gate denials into the shape callers see at the orchestration boundary
    pub fn caller_facing(self) -> Self {
        match self {
            EnrollmentError::AccessDenied { class_ids, reason } => {
                EnrollmentError::UnauthorizedAccess { class_ids, reason }
            }
            other => other,
        }
    }

    /// Structured payload describing the failing entities
    pub fn context(&self) -> Value {
        match self {
            EnrollmentError::AccessDenied { class_ids, reason }
            | EnrollmentError::UnauthorizedAccess { class_ids, reason } => {
                json!({ "class_ids": class_ids, "reason": reason })
            }
            EnrollmentError::ClassNotFound(id) => json!({ "class_id": id }),
            EnrollmentError::TeacherNotFound(id) => json!({ "teacher_id": id }),
            EnrollmentError::StudentNotFound(id) => json!({ "student_id": id }),
            EnrollmentError::StudentAlreadyEnrolled { class_id, student_id }
            | EnrollmentError::StudentNotEnrolled { class_id, student_id } => {
                json!({ "class_id": class_id, "student_id": student_id })
            }
            EnrollmentError::ClassCapacityExceeded { class_id, capacity } => {
                json!({ "class_id": class_id, "capacity": capacity })
            }
            EnrollmentError::CrossSchoolEnrollment { class_school, caller_school } => {
                json!({ "class_school_id": class_school, "caller_school_id": caller_school })
            }
            EnrollmentError::StudentFromOtherSchool { class_id, student_id } => {
                json!({ "class_id": class_id, "student_id": student_id })
            }
            EnrollmentError::SchoolMismatch { class_school, teacher_school } => {
                json!({ "class_school_id": class_school, "teacher_school_id": teacher_school })
            }
            EnrollmentError::ClassHasStudents { class_id, enrolled } => {
                json!({ "class_id": class_id, "enrolled": enrolled })
            }
            EnrollmentError::DuplicateClassName { school_id, name } => {
                json!({ "school_id": school_id, "name": name })
            }
            EnrollmentError::InvalidInput(msg) | EnrollmentError::Network(msg) => {
                json!({ "detail": msg })
            }
            EnrollmentError::Unexpected { context, .. } => json!({ "detail": context }),
        }
    }
}

impl From<DatabaseError> for EnrollmentError {
    fn from(err: DatabaseError) -> Self {
        if err.is_transient() {
            return EnrollmentError::Network(err.to_string());
        }
        EnrollmentError::unexpected("repository operation failed", err)
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    Unauthorized(String),

    // Domain errors carry their own status mapping
    Enrollment(EnrollmentError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Enrollment(err) => match err.kind() {
                ErrorKind::InvalidInput => 400,
                ErrorKind::AccessDenied | ErrorKind::UnauthorizedAccess => 403,
                ErrorKind::ClassNotFound | ErrorKind::TeacherNotFound | ErrorKind::StudentNotFound => 404,
                ErrorKind::StudentAlreadyEnrolled
                | ErrorKind::StudentNotEnrolled
                | ErrorKind::ClassCapacityExceeded
                | ErrorKind::ClassHasStudents
                | ErrorKind::DuplicateClassName => 409,
                ErrorKind::CrossSchoolEnrollment | ErrorKind::SchoolMismatch => 422,
                ErrorKind::NetworkError => 503,
                ErrorKind::UnexpectedError => 500,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Enrollment(err) => err.kind().code(),
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) | ApiError::Unauthorized(msg) => msg.clone(),
            // Don't expose internal causes to clients
            ApiError::Enrollment(EnrollmentError::Unexpected { .. }) => {
                "An error occurred while processing your request".to_string()
            }
            ApiError::Enrollment(EnrollmentError::Network(_)) => {
                "Database temporarily unavailable".to_string()
            }
            ApiError::Enrollment(err) => err.to_string(),
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let context = match self {
            ApiError::Enrollment(EnrollmentError::Unexpected { .. })
            | ApiError::Enrollment(EnrollmentError::Network(_)) => Value::Null,
            ApiError::Enrollment(err) => err.context(),
            _ => Value::Null,
        };
        json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": self.message(),
                "context": context,
            }
        })
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(err: EnrollmentError) -> Self {
        if let EnrollmentError::Unexpected { context, source } = &err {
            tracing::error!("Unexpected error: {}: {}", context, source);
        }
        ApiError::Enrollment(err.caller_facing())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}
