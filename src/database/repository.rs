use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::database::manager::DatabaseError;
use crate::database::models::{
    AtomicEnrollRequest, AtomicEnrollResult, BoardingFilter, ClassChanges, ClassEntity,
    ClassStatus, EnrollmentRecord, Gender, NewClass, RowChange, Student, TeacherProfile,
};
use crate::sanitize::{Pagination, Sort};

/// Columns callers may sort available-student listings by
pub const STUDENT_SORT_COLUMNS: &[&str] = &["name", "nis", "created_at"];

/// Columns callers may sort class listings by
pub const CLASS_SORT_COLUMNS: &[&str] = &["name", "created_at", "student_capacity", "status"];

/// One page of results plus the size of the whole filtered set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

/// Students of a tenant not enrolled in `class_id`. All string fields must
/// already be sanitized.
#[derive(Debug, Clone)]
pub struct StudentQuery {
    pub school_id: Uuid,
    pub class_id: Uuid,
    pub search: Option<String>,
    pub gender: Option<Gender>,
    pub boarding: Option<BoardingFilter>,
    pub sort: Sort,
    pub pagination: Pagination,
}

/// Live classes of a tenant. String fields must already be sanitized.
#[derive(Debug, Clone)]
pub struct ClassQuery {
    pub school_id: Uuid,
    /// Restrict to classes assigned to this teacher
    pub teacher_id: Option<Uuid>,
    pub status: Option<ClassStatus>,
    pub search: Option<String>,
    pub sort: Sort,
    pub pagination: Pagination,
}

/// Narrow boundary over the persistence engine.
///
/// Single-row mutations return the row as it was immediately before and
/// after the write, read in the same step. `atomic_enroll` is the only
/// compound operation and the sole authority for the capacity invariant.
#[async_trait]
pub trait ClassRepository: Send + Sync {
    /// Teacher profile for an authenticated user id
    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError>;

    async fn find_teacher(&self, teacher_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError>;

    /// Any class row, soft-deleted or not
    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassEntity>, DatabaseError>;

    /// Live class with this name in the tenant, compared case-insensitively
    async fn find_class_by_name(&self, school_id: Uuid, name: &str) -> Result<Option<ClassEntity>, DatabaseError>;

    async fn list_classes(&self, query: &ClassQuery) -> Result<Page<ClassEntity>, DatabaseError>;

    async fn create_class(&self, new_class: &NewClass) -> Result<ClassEntity, DatabaseError>;

    async fn update_class(
        &self,
        class_id: Uuid,
        changes: &ClassChanges,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError>;

    async fn assign_teacher(
        &self,
        class_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError>;

    async fn soft_delete_class(
        &self,
        class_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError>;

    async fn restore_class(&self, class_id: Uuid) -> Result<Option<RowChange<ClassEntity>>, DatabaseError>;

    async fn find_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError>;

    async fn list_enrollments(&self, class_id: Uuid) -> Result<Vec<EnrollmentRecord>, DatabaseError>;

    /// Delete one enrollment, returning the removed record
    async fn delete_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError>;

    /// Capacity-checked insert of every still-fittable student, as one
    /// indivisible operation. Reports one entry per input element.
    async fn atomic_enroll(&self, request: &AtomicEnrollRequest) -> Result<AtomicEnrollResult, DatabaseError>;

    /// Exclusion of enrolled students happens in the query, so `total`
    /// and paging stay exact.
    async fn available_students(&self, query: &StudentQuery) -> Result<Page<Student>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
