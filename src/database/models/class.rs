use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a class. Soft delete moves a class to `Archived` and
/// stamps `deleted_at`; restore returns it to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "class_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClassStatus {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ClassEntity {
    pub id: Uuid,
    pub school_id: Uuid,
    pub teacher_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub student_capacity: i32,
    pub status: ClassStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ClassEntity {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClass {
    pub school_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub student_capacity: i32,
    pub teacher_id: Option<Uuid>,
}

/// Field updates applied by single and bulk class updates. Tenant and
/// teacher assignment are deliberately absent: they change only through
/// reassignment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub student_capacity: Option<i32>,
    pub status: Option<ClassStatus>,
}

impl ClassChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.student_capacity.is_none()
            && self.status.is_none()
    }
}

/// Row state captured in the same step as a write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowChange<T> {
    pub before: T,
    pub after: T,
}
