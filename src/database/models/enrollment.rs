use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ErrorKind;

/// A live enrollment. Identity is `(class_id, student_id)`; records are
/// created and deleted, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct EnrollmentRecord {
    pub class_id: Uuid,
    pub student_id: Uuid,
    pub enrollment_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub enrolled_by: Uuid,
}

/// Input to the single capacity-checked enrollment primitive
#[derive(Debug, Clone)]
pub struct AtomicEnrollRequest {
    pub class_id: Uuid,
    pub student_ids: Vec<Uuid>,
    pub enrolled_by: Uuid,
    pub school_id: Uuid,
    pub enrollment_date: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollFailure {
    pub student_id: Uuid,
    pub error: ErrorKind,
}

/// Per-student outcome of `atomic_enroll`, in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtomicEnrollResult {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<EnrollFailure>,
}
