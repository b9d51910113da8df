use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use classroom_enrollment::access::AccessGate;
use classroom_enrollment::audit::AuditRecorder;
use classroom_enrollment::database::models::{
    AtomicEnrollRequest, AtomicEnrollResult, ClassChanges, ClassEntity, ClassStatus, EnrollmentRecord,
    NewClass, RowChange, Student, TeacherProfile,
};
use classroom_enrollment::database::{ClassQuery, ClassRepository, DatabaseError, Page, StudentQuery};
use classroom_enrollment::error::ErrorKind;
use classroom_enrollment::retry::RetryPolicy;
use classroom_enrollment::services::ClassService;
use classroom_enrollment::testing::{sample_class, sample_student, sample_teacher, MemoryRepository};
use classroom_enrollment::types::Role;

/// Commits a queued enrollment just before the next class write, after the
/// service has already read and authorised the class.
struct LateEnrollment {
    inner: Arc<MemoryRepository>,
    queued: StdMutex<Option<AtomicEnrollRequest>>,
}

impl LateEnrollment {
    async fn land(&self) -> Result<(), DatabaseError> {
        let queued = self.queued.lock().unwrap().take();
        if let Some(request) = queued {
            let result = self.inner.atomic_enroll(&request).await?;
            assert_eq!(result.succeeded, request.student_ids);
        }
        Ok(())
    }
}

#[async_trait]
impl ClassRepository for LateEnrollment {
    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        self.inner.find_profile_by_user(user_id).await
    }

    async fn find_teacher(&self, teacher_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        self.inner.find_teacher(teacher_id).await
    }

    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassEntity>, DatabaseError> {
        self.inner.find_class(class_id).await
    }

    async fn find_class_by_name(&self, school_id: Uuid, name: &str) -> Result<Option<ClassEntity>, DatabaseError> {
        self.inner.find_class_by_name(school_id, name).await
    }

    async fn list_classes(&self, query: &ClassQuery) -> Result<Page<ClassEntity>, DatabaseError> {
        self.inner.list_classes(query).await
    }

    async fn create_class(&self, new_class: &NewClass) -> Result<ClassEntity, DatabaseError> {
        self.inner.create_class(new_class).await
    }

    async fn update_class(
        &self,
        class_id: Uuid,
        changes: &ClassChanges,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.land().await?;
        self.inner.update_class(class_id, changes).await
    }

    async fn assign_teacher(
        &self,
        class_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.inner.assign_teacher(class_id, teacher_id).await
    }

    async fn soft_delete_class(
        &self,
        class_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.land().await?;
        self.inner.soft_delete_class(class_id, at).await
    }

    async fn restore_class(&self, class_id: Uuid) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.inner.restore_class(class_id).await
    }

    async fn find_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        self.inner.find_enrollment(class_id, student_id).await
    }

    async fn list_enrollments(&self, class_id: Uuid) -> Result<Vec<EnrollmentRecord>, DatabaseError> {
        self.inner.list_enrollments(class_id).await
    }

    async fn delete_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        self.inner.delete_enrollment(class_id, student_id).await
    }

    async fn atomic_enroll(&self, request: &AtomicEnrollRequest) -> Result<AtomicEnrollResult, DatabaseError> {
        self.inner.atomic_enroll(request).await
    }

    async fn available_students(&self, query: &StudentQuery) -> Result<Page<Student>, DatabaseError> {
        self.inner.available_students(query).await
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.inner.health_check().await
    }
}

struct Fixture {
    memory: Arc<MemoryRepository>,
    service: ClassService,
    caller: classroom_enrollment::types::CallerContext,
    class: ClassEntity,
    late: AtomicEnrollRequest,
}

async fn fixture(capacity: i32, late_students: usize) -> (Arc<LateEnrollment>, Fixture) {
    let memory = Arc::new(MemoryRepository::new());
    let school = Uuid::new_v4();
    let manager = sample_teacher(school, Role::Management);
    memory.insert_teacher(manager.clone()).await;
    let class = sample_class(school, None, "7A", capacity);
    memory.insert_class(class.clone()).await;

    let mut student_ids = Vec::new();
    for i in 0..late_students {
        let student = sample_student(school, &format!("Late {}", i));
        student_ids.push(student.id);
        memory.insert_student(student).await;
    }
    let late = AtomicEnrollRequest {
        class_id: class.id,
        student_ids,
        enrolled_by: manager.user_id,
        school_id: school,
        enrollment_date: Utc::now(),
        notes: None,
    };

    let repo = Arc::new(LateEnrollment { inner: memory.clone(), queued: StdMutex::new(None) });
    let gate = AccessGate::new(repo.clone(), RetryPolicy::none());
    let caller = gate.resolve_caller(manager.user_id).await.expect("caller resolves");
    let service = ClassService::new(repo.clone(), gate, AuditRecorder::disabled(), RetryPolicy::none());
    (repo, Fixture { memory, service, caller, class, late })
}

#[tokio::test]
async fn enrollment_landing_before_delete_write_blocks_the_delete() {
    let (repo, f) = fixture(10, 1).await;
    *repo.queued.lock().unwrap() = Some(f.late.clone());

    let err = f.service.soft_delete_class(&f.caller, f.class.id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ClassHasStudents);
    let class = f.memory.class(f.class.id).await.unwrap();
    assert!(class.deleted_at.is_none());
    assert_eq!(class.status, ClassStatus::Active);
    assert_eq!(f.memory.enrolled_count(f.class.id).await, 1);
}

#[tokio::test]
async fn delete_succeeds_once_the_class_is_empty() {
    let (_, f) = fixture(10, 0).await;
    let deleted = f.service.soft_delete_class(&f.caller, f.class.id).await.unwrap();
    assert_eq!(deleted.status, ClassStatus::Archived);
    assert!(deleted.deleted_at.is_some());
}

#[tokio::test]
async fn capacity_shrink_checks_enrollments_committed_after_the_read() {
    let (repo, f) = fixture(10, 3).await;
    *repo.queued.lock().unwrap() = Some(f.late.clone());

    let shrink = ClassChanges { student_capacity: Some(2), ..Default::default() };
    let err = f.service.update_class(&f.caller, f.class.id, &shrink).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(f.memory.class(f.class.id).await.unwrap().student_capacity, 10);
    assert_eq!(f.memory.enrolled_count(f.class.id).await, 3);
}
