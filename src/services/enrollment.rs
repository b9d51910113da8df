use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::AccessGate;
use crate::audit::{AuditAction, AuditEntity, AuditRecorder};
use crate::database::models::{
    AtomicEnrollRequest, BoardingFilter, ClassEntity, EnrollmentRecord, Gender, Student,
};
use crate::database::repository::STUDENT_SORT_COLUMNS;
use crate::database::{ClassRepository, StudentQuery};
use crate::error::{EnrollmentError, ErrorKind};
use crate::retry::RetryPolicy;
use crate::sanitize::{clamp_pagination, clamp_sort, clean_optional_search};
use crate::types::{AccessOperation, BulkOutcome, CallerContext};

pub const MAX_NOTES_LENGTH: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollStudent {
    pub student_id: Uuid,
    pub enrollment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkEnrollStudents {
    pub student_ids: Vec<Uuid>,
    pub enrollment_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Raw filters for the available-students search; sanitized before use
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AvailableStudentsFilter {
    pub search: Option<String>,
    pub gender: Option<Gender>,
    pub boarding: Option<BoardingFilter>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailableStudents {
    pub students: Vec<Student>,
    /// Size of the whole filtered set, not just this page
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn check_notes(notes: &Option<String>) -> Result<(), EnrollmentError> {
    match notes {
        Some(n) if n.chars().count() > MAX_NOTES_LENGTH => Err(EnrollmentError::InvalidInput(format!(
            "notes must be at most {} characters",
            MAX_NOTES_LENGTH
        ))),
        _ => Ok(()),
    }
}

/// Typed error for one failed entry of an atomic enroll
fn enroll_failure(kind: ErrorKind, class: &ClassEntity, student_id: Uuid) -> EnrollmentError {
    match kind {
        ErrorKind::StudentAlreadyEnrolled => EnrollmentError::StudentAlreadyEnrolled {
            class_id: class.id,
            student_id,
        },
        ErrorKind::ClassCapacityExceeded => EnrollmentError::ClassCapacityExceeded {
            class_id: class.id,
            capacity: class.student_capacity,
        },
        ErrorKind::StudentNotFound => EnrollmentError::StudentNotFound(student_id),
        ErrorKind::ClassNotFound => EnrollmentError::ClassNotFound(class.id),
        ErrorKind::CrossSchoolEnrollment => EnrollmentError::StudentFromOtherSchool {
            class_id: class.id,
            student_id,
        },
        other => EnrollmentError::unexpected(
            format!("atomic enroll of student {} into class {}", student_id, class.id),
            format!("store reported {}", other),
        ),
    }
}

/// Enroll and remove students, keeping capacity, uniqueness and tenant
/// invariants. Capacity is decided by the repository's atomic enroll alone.
#[derive(Clone)]
pub struct EnrollmentService {
    repo: Arc<dyn ClassRepository>,
    gate: AccessGate,
    audit: AuditRecorder,
    retry: RetryPolicy,
}

impl EnrollmentService {
    pub fn new(
        repo: Arc<dyn ClassRepository>,
        gate: AccessGate,
        audit: AuditRecorder,
        retry: RetryPolicy,
    ) -> Self {
        Self { repo, gate, audit, retry }
    }

    /// Access check plus the tenant rule, before any write
    async fn enrollable_class(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
    ) -> Result<ClassEntity, EnrollmentError> {
        self.gate.require_enroll_access(caller, class_id).await
    }

    pub async fn enroll_student(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        data: EnrollStudent,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        check_notes(&data.notes)?;
        let class = self.enrollable_class(caller, class_id).await?;

        let request = AtomicEnrollRequest {
            class_id,
            student_ids: vec![data.student_id],
            enrolled_by: caller.caller_id,
            school_id: class.school_id,
            enrollment_date: data.enrollment_date.unwrap_or_else(Utc::now),
            notes: data.notes,
        };
        let repo = &self.repo;
        let request_ref = &request;
        let result = self
            .retry
            .run("atomic_enroll", move || repo.atomic_enroll(request_ref))
            .await?;

        if let Some(failure) = result.failed.iter().find(|f| f.student_id == data.student_id) {
            return Err(enroll_failure(failure.error, &class, data.student_id));
        }
        if !result.succeeded.contains(&data.student_id) {
            return Err(EnrollmentError::unexpected(
                format!("atomic enroll of student {} into class {}", data.student_id, class_id),
                "store returned no outcome for the student",
            ));
        }

        let record = EnrollmentRecord {
            class_id,
            student_id: data.student_id,
            enrollment_date: request.enrollment_date,
            notes: request.notes,
            enrolled_by: caller.caller_id,
        };
        self.audit.record(
            AuditEntity::Enrollment,
            format!("{}:{}", class_id, data.student_id),
            AuditAction::Enroll,
            None,
            Some(&record),
            caller.caller_id,
        );
        tracing::info!("Enrolled student {} in class {}", data.student_id, class_id);
        Ok(record)
    }

    /// One atomic enroll call for the whole list. Every input occurrence is
    /// reported exactly once, in input order.
    pub async fn bulk_enroll_students(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        data: BulkEnrollStudents,
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        check_notes(&data.notes)?;
        let class = self.enrollable_class(caller, class_id).await?;
        if data.student_ids.is_empty() {
            return Ok(BulkOutcome::new());
        }

        let request = AtomicEnrollRequest {
            class_id,
            student_ids: data.student_ids,
            enrolled_by: caller.caller_id,
            school_id: class.school_id,
            enrollment_date: data.enrollment_date.unwrap_or_else(Utc::now),
            notes: data.notes,
        };
        let repo = &self.repo;
        let request_ref = &request;
        let result = self
            .retry
            .run("atomic_enroll", move || repo.atomic_enroll(request_ref))
            .await?;

        // Per id, outcomes in the order the store produced them. The first
        // occurrence of a duplicated id is the one that can succeed.
        let mut outcomes: HashMap<Uuid, VecDeque<Option<ErrorKind>>> = HashMap::new();
        for id in &result.succeeded {
            outcomes.entry(*id).or_default().push_back(None);
        }
        for failure in &result.failed {
            outcomes.entry(failure.student_id).or_default().push_back(Some(failure.error));
        }

        let mut outcome = BulkOutcome::new();
        for &student_id in &request.student_ids {
            match outcomes.get_mut(&student_id).and_then(|q| q.pop_front()) {
                Some(None) => {
                    let record = EnrollmentRecord {
                        class_id,
                        student_id,
                        enrollment_date: request.enrollment_date,
                        notes: request.notes.clone(),
                        enrolled_by: caller.caller_id,
                    };
                    self.audit.record(
                        AuditEntity::Enrollment,
                        format!("{}:{}", class_id, student_id),
                        AuditAction::Enroll,
                        None,
                        Some(&record),
                        caller.caller_id,
                    );
                    outcome.succeed(student_id);
                }
                Some(Some(kind)) => {
                    let err = enroll_failure(kind, &class, student_id);
                    tracing::debug!("Bulk enroll: student {} not enrolled: {}", student_id, err);
                    outcome.fail(student_id, err.kind(), err.to_string());
                }
                None => outcome.fail(
                    student_id,
                    ErrorKind::UnexpectedError,
                    "store returned no outcome for the student",
                ),
            }
        }

        tracing::info!(
            "Bulk enroll into class {}: {} succeeded, {} failed",
            class_id,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    pub async fn remove_student(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let class = self.gate.require_access(caller, class_id, AccessOperation::Remove).await?;
        self.remove_enrollment(caller, &class, student_id).await
    }

    /// Removals are independent: a failure for one student never undoes or
    /// blocks the others.
    pub async fn bulk_remove_students(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        student_ids: &[Uuid],
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        let class = self.gate.require_access(caller, class_id, AccessOperation::Remove).await?;

        let mut outcome = BulkOutcome::new();
        for &student_id in student_ids {
            let result = self.remove_enrollment(caller, &class, student_id).await;
            if let Err(e) = &result {
                tracing::debug!("Bulk remove: student {} kept in class {}: {}", student_id, class_id, e);
            }
            outcome.record(student_id, result);
        }
        tracing::info!(
            "Bulk remove from class {}: {} succeeded, {} failed",
            class_id,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        Ok(outcome)
    }

    async fn remove_enrollment(
        &self,
        caller: &CallerContext,
        class: &ClassEntity,
        student_id: Uuid,
    ) -> Result<EnrollmentRecord, EnrollmentError> {
        let not_enrolled = EnrollmentError::StudentNotEnrolled {
            class_id: class.id,
            student_id,
        };
        let repo = &self.repo;
        let class_id = class.id;
        let existing = self
            .retry
            .run("find_enrollment", move || repo.find_enrollment(class_id, student_id))
            .await?;
        if existing.is_none() {
            return Err(not_enrolled);
        }

        // Deletes are not retried; a lost response would turn into a false
        // STUDENT_NOT_ENROLLED on the second attempt.
        let Some(removed) = self.repo.delete_enrollment(class_id, student_id).await? else {
            return Err(not_enrolled);
        };

        self.audit.record(
            AuditEntity::Enrollment,
            format!("{}:{}", class_id, student_id),
            AuditAction::Unenroll,
            Some(&removed),
            None,
            caller.caller_id,
        );
        tracing::info!("Removed student {} from class {}", student_id, class_id);
        Ok(removed)
    }

    pub async fn list_enrolled_students(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
    ) -> Result<Vec<EnrollmentRecord>, EnrollmentError> {
        self.gate.require_access(caller, class_id, AccessOperation::Read).await?;
        let repo = &self.repo;
        Ok(self
            .retry
            .run("list_enrollments", move || repo.list_enrollments(class_id))
            .await?)
    }

    /// Students of the class's school not enrolled in it. Exclusion, filters
    /// and paging all happen in the store query.
    pub async fn get_available_students(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        filter: AvailableStudentsFilter,
    ) -> Result<AvailableStudents, EnrollmentError> {
        let class = self.gate.require_access(caller, class_id, AccessOperation::Read).await?;

        let query = StudentQuery {
            school_id: class.school_id,
            class_id,
            search: clean_optional_search(filter.search.as_deref()),
            gender: filter.gender,
            boarding: filter.boarding,
            sort: clamp_sort(
                filter.sort_by.as_deref(),
                filter.sort_order.as_deref(),
                STUDENT_SORT_COLUMNS,
                "name",
            ),
            pagination: clamp_pagination(filter.page, filter.limit),
        };
        let repo = &self.repo;
        let query_ref = &query;
        let page = self
            .retry
            .run("available_students", move || repo.available_students(query_ref))
            .await?;

        Ok(AvailableStudents {
            students: page.items,
            total: page.total,
            page: query.pagination.page,
            limit: query.pagination.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_class, sample_student, sample_teacher, MemoryRepository};
    use crate::types::Role;

    struct Fixture {
        repo: Arc<MemoryRepository>,
        service: EnrollmentService,
        caller: CallerContext,
        class: ClassEntity,
    }

    async fn fixture(capacity: i32) -> Fixture {
        let repo = Arc::new(MemoryRepository::new());
        let school = Uuid::new_v4();
        let teacher = sample_teacher(school, Role::Teacher);
        repo.insert_teacher(teacher.clone()).await;
        let class = sample_class(school, Some(teacher.id), "7A", capacity);
        repo.insert_class(class.clone()).await;

        let gate = AccessGate::new(repo.clone(), RetryPolicy::none());
        let caller = gate.resolve_caller(teacher.user_id).await.unwrap();
        let service = EnrollmentService::new(repo.clone(), gate, AuditRecorder::disabled(), RetryPolicy::none());
        Fixture { repo, service, caller, class }
    }

    async fn student(f: &Fixture, name: &str) -> Uuid {
        let s = sample_student(f.class.school_id, name);
        f.repo.insert_student(s.clone()).await;
        s.id
    }

    fn enroll(student_id: Uuid) -> EnrollStudent {
        EnrollStudent { student_id, enrollment_date: None, notes: None }
    }

    #[tokio::test]
    async fn overlong_notes_are_rejected_before_any_write() {
        let f = fixture(5).await;
        let s = student(&f, "Ana").await;
        let data = EnrollStudent {
            notes: Some("x".repeat(MAX_NOTES_LENGTH + 1)),
            ..enroll(s)
        };
        let err = f.service.enroll_student(&f.caller, f.class.id, data).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(f.repo.atomic_enroll_calls(), 0);
    }

    #[tokio::test]
    async fn full_class_reports_capacity() {
        let f = fixture(1).await;
        let a = student(&f, "Ana").await;
        let b = student(&f, "Budi").await;
        f.service.enroll_student(&f.caller, f.class.id, enroll(a)).await.unwrap();
        let err = f.service.enroll_student(&f.caller, f.class.id, enroll(b)).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::ClassCapacityExceeded { capacity: 1, .. }));
    }

    #[tokio::test]
    async fn duplicated_ids_in_one_request_are_each_reported() {
        let f = fixture(5).await;
        let a = student(&f, "Ana").await;
        let outcome = f
            .service
            .bulk_enroll_students(
                &f.caller,
                f.class.id,
                BulkEnrollStudents { student_ids: vec![a, a], ..Default::default() },
            )
            .await
            .unwrap();
        assert_eq!(outcome.succeeded, vec![a]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].error, ErrorKind::StudentAlreadyEnrolled);
    }

    #[tokio::test]
    async fn removing_unknown_enrollment_is_an_error() {
        let f = fixture(5).await;
        let a = student(&f, "Ana").await;
        let err = f.service.remove_student(&f.caller, f.class.id, a).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StudentNotEnrolled);
    }

    #[tokio::test]
    async fn roster_lists_enrollments() {
        let f = fixture(5).await;
        let a = student(&f, "Ana").await;
        f.service.enroll_student(&f.caller, f.class.id, enroll(a)).await.unwrap();
        let roster = f.service.list_enrolled_students(&f.caller, f.class.id).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].enrolled_by, f.caller.caller_id);
    }

    #[tokio::test]
    async fn available_search_is_sanitized_and_clamped() {
        let f = fixture(5).await;
        student(&f, "Ana").await;
        student(&f, "Budi").await;
        let result = f
            .service
            .get_available_students(
                &f.caller,
                f.class.id,
                AvailableStudentsFilter {
                    search: Some("'an%a".into()),
                    sort_by: Some("password".into()),
                    limit: Some(1000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.students[0].name, "Ana");
        assert_eq!(result.limit, 100);
    }
}
