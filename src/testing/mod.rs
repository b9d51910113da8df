//! In-memory store and audit sink for tests and local development.
//!
//! `MemoryRepository` follows the same contract as the Postgres store:
//! `atomic_enroll` holds one lock across its capacity check and inserts, and
//! listings filter and page inside the store. Transient faults can be
//! injected per operation to exercise retry paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::database::models::{
    AtomicEnrollRequest, AtomicEnrollResult, ClassChanges, ClassEntity, ClassStatus,
    EnrollFailure, EnrollmentRecord, NewClass, RowChange, Student, TeacherProfile,
};
use crate::database::repository::{ClassQuery, ClassRepository, Page, StudentQuery};
use crate::database::DatabaseError;
use crate::error::ErrorKind;
use crate::sanitize::{Pagination, Sort, SortDirection};
use crate::types::Role;

const NAME_CONSTRAINT: &str = "classes_school_name_key";

#[derive(Default)]
struct State {
    teachers: HashMap<Uuid, TeacherProfile>,
    students: HashMap<Uuid, Student>,
    classes: HashMap<Uuid, ClassEntity>,
    enrollments: BTreeMap<(Uuid, Uuid), EnrollmentRecord>,
}

impl State {
    fn enrolled_count(&self, class_id: Uuid) -> usize {
        self.enrollments.range((class_id, Uuid::nil())..=(class_id, Uuid::from_u128(u128::MAX))).count()
    }

    fn name_taken(&self, school_id: Uuid, name: &str, except: Option<Uuid>) -> bool {
        self.classes.values().any(|c| {
            c.school_id == school_id
                && c.deleted_at.is_none()
                && Some(c.id) != except
                && c.name.eq_ignore_ascii_case(name)
        })
    }
}

#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    faults: StdMutex<HashMap<&'static str, usize>>,
    atomic_enroll_calls: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_teacher(&self, teacher: TeacherProfile) {
        self.state.lock().await.teachers.insert(teacher.id, teacher);
    }

    pub async fn remove_teacher(&self, teacher_id: Uuid) {
        self.state.lock().await.teachers.remove(&teacher_id);
    }

    pub async fn insert_student(&self, student: Student) {
        self.state.lock().await.students.insert(student.id, student);
    }

    pub async fn insert_class(&self, class: ClassEntity) {
        self.state.lock().await.classes.insert(class.id, class);
    }

    /// Insert an enrollment directly, bypassing the capacity check
    pub async fn insert_enrollment(&self, record: EnrollmentRecord) {
        self.state
            .lock()
            .await
            .enrollments
            .insert((record.class_id, record.student_id), record);
    }

    pub async fn enrolled_count(&self, class_id: Uuid) -> usize {
        self.state.lock().await.enrolled_count(class_id)
    }

    pub async fn class(&self, class_id: Uuid) -> Option<ClassEntity> {
        self.state.lock().await.classes.get(&class_id).cloned()
    }

    /// Make the next `times` calls of `operation` fail with a connection error
    pub fn fail_next(&self, operation: &'static str, times: usize) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(operation, times);
        }
    }

    pub fn atomic_enroll_calls(&self) -> usize {
        self.atomic_enroll_calls.load(Ordering::SeqCst)
    }

    fn check_fault(&self, operation: &'static str) -> Result<(), DatabaseError> {
        let Ok(mut faults) = self.faults.lock() else {
            return Ok(());
        };
        match faults.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(DatabaseError::ConnectionError(format!("{}: connection refused", operation)))
            }
            _ => Ok(()),
        }
    }

    fn change<F>(state: &mut State, class_id: Uuid, apply: F) -> Result<Option<RowChange<ClassEntity>>, DatabaseError>
    where
        F: FnOnce(&State, &mut ClassEntity) -> Result<(), DatabaseError>,
    {
        let Some(before) = state.classes.get(&class_id).cloned() else {
            return Ok(None);
        };
        let mut after = before.clone();
        apply(state, &mut after)?;
        after.updated_at = Utc::now();
        state.classes.insert(class_id, after.clone());
        Ok(Some(RowChange { before, after }))
    }
}

fn page_of<T: Clone>(mut items: Vec<T>, pagination: Pagination) -> Page<T> {
    let total = items.len() as i64;
    let offset = pagination.offset().max(0) as usize;
    let limit = pagination.limit.max(0) as usize;
    let items = if offset >= items.len() {
        vec![]
    } else {
        items.drain(offset..).take(limit).collect()
    };
    Page { items, total }
}

fn apply_direction(ordering: std::cmp::Ordering, sort: &Sort) -> std::cmp::Ordering {
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[async_trait]
impl ClassRepository for MemoryRepository {
    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        self.check_fault("find_profile_by_user")?;
        let state = self.state.lock().await;
        Ok(state.teachers.values().find(|t| t.user_id == user_id).cloned())
    }

    async fn find_teacher(&self, teacher_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        self.check_fault("find_teacher")?;
        Ok(self.state.lock().await.teachers.get(&teacher_id).cloned())
    }

    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassEntity>, DatabaseError> {
        self.check_fault("find_class")?;
        Ok(self.state.lock().await.classes.get(&class_id).cloned())
    }

    async fn find_class_by_name(&self, school_id: Uuid, name: &str) -> Result<Option<ClassEntity>, DatabaseError> {
        self.check_fault("find_class_by_name")?;
        let state = self.state.lock().await;
        Ok(state
            .classes
            .values()
            .find(|c| c.school_id == school_id && c.deleted_at.is_none() && c.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_classes(&self, query: &ClassQuery) -> Result<Page<ClassEntity>, DatabaseError> {
        self.check_fault("list_classes")?;
        let state = self.state.lock().await;
        let mut classes: Vec<ClassEntity> = state
            .classes
            .values()
            .filter(|c| c.school_id == query.school_id && c.deleted_at.is_none())
            .filter(|c| query.teacher_id.map_or(true, |t| c.teacher_id == Some(t)))
            .filter(|c| query.status.map_or(true, |s| c.status == s))
            .filter(|c| query.search.as_deref().map_or(true, |s| contains_ci(&c.name, s)))
            .cloned()
            .collect();
        classes.sort_by(|a, b| {
            let ordering = match query.sort.column.as_str() {
                "created_at" => a.created_at.cmp(&b.created_at),
                "student_capacity" => a.student_capacity.cmp(&b.student_capacity),
                "status" => format!("{:?}", a.status).cmp(&format!("{:?}", b.status)),
                _ => a.name.cmp(&b.name),
            };
            apply_direction(ordering, &query.sort).then(a.id.cmp(&b.id))
        });
        Ok(page_of(classes, query.pagination))
    }

    async fn create_class(&self, new_class: &NewClass) -> Result<ClassEntity, DatabaseError> {
        self.check_fault("create_class")?;
        let mut state = self.state.lock().await;
        if state.name_taken(new_class.school_id, &new_class.name, None) {
            return Err(DatabaseError::Conflict(NAME_CONSTRAINT.to_string()));
        }
        let now = Utc::now();
        let class = ClassEntity {
            id: Uuid::new_v4(),
            school_id: new_class.school_id,
            teacher_id: new_class.teacher_id,
            name: new_class.name.clone(),
            description: new_class.description.clone(),
            student_capacity: new_class.student_capacity,
            status: ClassStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.classes.insert(class.id, class.clone());
        Ok(class)
    }

    async fn update_class(
        &self,
        class_id: Uuid,
        changes: &ClassChanges,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.check_fault("update_class")?;
        let mut state = self.state.lock().await;
        Self::change(&mut state, class_id, |state, class| {
            if let Some(name) = &changes.name {
                if state.name_taken(class.school_id, name, Some(class.id)) {
                    return Err(DatabaseError::Conflict(NAME_CONSTRAINT.to_string()));
                }
                class.name = name.clone();
            }
            if let Some(description) = &changes.description {
                class.description = Some(description.clone());
            }
            if let Some(capacity) = changes.student_capacity {
                let enrolled = state.enrolled_count(class.id) as i64;
                if enrolled > i64::from(capacity) {
                    return Err(DatabaseError::CapacityBelowEnrollment(enrolled));
                }
                class.student_capacity = capacity;
            }
            if let Some(status) = changes.status {
                class.status = status;
            }
            Ok(())
        })
    }

    async fn assign_teacher(
        &self,
        class_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.check_fault("assign_teacher")?;
        let mut state = self.state.lock().await;
        Self::change(&mut state, class_id, |_, class| {
            class.teacher_id = Some(teacher_id);
            Ok(())
        })
    }

    async fn soft_delete_class(
        &self,
        class_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.check_fault("soft_delete_class")?;
        let mut state = self.state.lock().await;
        Self::change(&mut state, class_id, |state, class| {
            let enrolled = state.enrolled_count(class.id) as i64;
            if enrolled > 0 {
                return Err(DatabaseError::HasEnrollments(enrolled));
            }
            class.status = ClassStatus::Archived;
            class.deleted_at = Some(at);
            Ok(())
        })
    }

    async fn restore_class(&self, class_id: Uuid) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        self.check_fault("restore_class")?;
        let mut state = self.state.lock().await;
        Self::change(&mut state, class_id, |state, class| {
            if state.name_taken(class.school_id, &class.name, Some(class.id)) {
                return Err(DatabaseError::Conflict(NAME_CONSTRAINT.to_string()));
            }
            class.status = ClassStatus::Active;
            class.deleted_at = None;
            Ok(())
        })
    }

    async fn find_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        self.check_fault("find_enrollment")?;
        Ok(self.state.lock().await.enrollments.get(&(class_id, student_id)).cloned())
    }

    async fn list_enrollments(&self, class_id: Uuid) -> Result<Vec<EnrollmentRecord>, DatabaseError> {
        self.check_fault("list_enrollments")?;
        let state = self.state.lock().await;
        let mut records: Vec<EnrollmentRecord> = state
            .enrollments
            .range((class_id, Uuid::nil())..=(class_id, Uuid::from_u128(u128::MAX)))
            .map(|(_, r)| r.clone())
            .collect();
        records.sort_by(|a, b| a.enrollment_date.cmp(&b.enrollment_date).then(a.student_id.cmp(&b.student_id)));
        Ok(records)
    }

    async fn delete_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        self.check_fault("delete_enrollment")?;
        Ok(self.state.lock().await.enrollments.remove(&(class_id, student_id)))
    }

    async fn atomic_enroll(&self, request: &AtomicEnrollRequest) -> Result<AtomicEnrollResult, DatabaseError> {
        self.atomic_enroll_calls.fetch_add(1, Ordering::SeqCst);
        self.check_fault("atomic_enroll")?;

        let mut state = self.state.lock().await;
        // Give other tasks a chance to run while the lock is held
        tokio::task::yield_now().await;

        let mut result = AtomicEnrollResult::default();
        let fail_all = |result: &mut AtomicEnrollResult, error: ErrorKind| {
            for &student_id in &request.student_ids {
                result.failed.push(EnrollFailure { student_id, error });
            }
        };

        let Some(class) = state.classes.get(&request.class_id).filter(|c| c.deleted_at.is_none()).cloned() else {
            fail_all(&mut result, ErrorKind::ClassNotFound);
            return Ok(result);
        };
        if class.school_id != request.school_id {
            fail_all(&mut result, ErrorKind::CrossSchoolEnrollment);
            return Ok(result);
        }

        let mut count = state.enrolled_count(class.id);
        for &student_id in &request.student_ids {
            let error = match state.students.get(&student_id).filter(|s| s.deleted_at.is_none()) {
                None => Some(ErrorKind::StudentNotFound),
                Some(s) if s.school_id != class.school_id => Some(ErrorKind::CrossSchoolEnrollment),
                Some(_) if state.enrollments.contains_key(&(class.id, student_id)) => {
                    Some(ErrorKind::StudentAlreadyEnrolled)
                }
                Some(_) if count >= class.student_capacity.max(0) as usize => Some(ErrorKind::ClassCapacityExceeded),
                Some(_) => None,
            };
            match error {
                Some(error) => result.failed.push(EnrollFailure { student_id, error }),
                None => {
                    state.enrollments.insert(
                        (class.id, student_id),
                        EnrollmentRecord {
                            class_id: class.id,
                            student_id,
                            enrollment_date: request.enrollment_date,
                            notes: request.notes.clone(),
                            enrolled_by: request.enrolled_by,
                        },
                    );
                    count += 1;
                    result.succeeded.push(student_id);
                }
            }
        }
        Ok(result)
    }

    async fn available_students(&self, query: &StudentQuery) -> Result<Page<Student>, DatabaseError> {
        self.check_fault("available_students")?;
        let state = self.state.lock().await;
        let mut students: Vec<Student> = state
            .students
            .values()
            .filter(|s| s.school_id == query.school_id && s.deleted_at.is_none())
            .filter(|s| !state.enrollments.contains_key(&(query.class_id, s.id)))
            .filter(|s| {
                query.search.as_deref().map_or(true, |term| {
                    contains_ci(&s.name, term) || s.nis.as_deref().map_or(false, |n| contains_ci(n, term))
                })
            })
            .filter(|s| query.gender.map_or(true, |g| s.gender.as_deref() == Some(g.as_str())))
            .filter(|s| query.boarding.map_or(true, |b| s.is_boarding == b.is_boarding()))
            .cloned()
            .collect();
        students.sort_by(|a, b| {
            let ordering = match query.sort.column.as_str() {
                "nis" => a.nis.cmp(&b.nis),
                "created_at" => a.created_at.cmp(&b.created_at),
                _ => a.name.cmp(&b.name),
            };
            apply_direction(ordering, &query.sort).then(a.id.cmp(&b.id))
        });
        Ok(page_of(students, query.pagination))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        self.check_fault("health_check")
    }
}

/// Audit sink that keeps records in memory and can be told to fail
#[derive(Default)]
pub struct MemoryAuditSink {
    records: StdMutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), DatabaseError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionError("audit store unavailable".to_string()));
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

pub fn sample_teacher(school_id: Uuid, role: Role) -> TeacherProfile {
    TeacherProfile {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        school_id,
        name: format!("{:?} {}", role, &Uuid::new_v4().simple().to_string()[..6]),
        role,
    }
}

pub fn sample_student(school_id: Uuid, name: &str) -> Student {
    Student {
        id: Uuid::new_v4(),
        school_id,
        name: name.to_string(),
        nis: None,
        gender: None,
        is_boarding: false,
        created_at: Utc::now(),
        deleted_at: None,
    }
}

pub fn sample_class(school_id: Uuid, teacher_id: Option<Uuid>, name: &str, capacity: i32) -> ClassEntity {
    let now = Utc::now();
    ClassEntity {
        id: Uuid::new_v4(),
        school_id,
        teacher_id,
        name: name.to_string(),
        description: None,
        student_capacity: capacity,
        status: ClassStatus::Active,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::{clamp_pagination, clamp_sort};

    #[tokio::test]
    async fn atomic_enroll_reports_every_input_once() {
        let repo = MemoryRepository::new();
        let school = Uuid::new_v4();
        let class = sample_class(school, None, "7A", 2);
        let students: Vec<Student> = (0..3).map(|i| sample_student(school, &format!("S{}", i))).collect();
        repo.insert_class(class.clone()).await;
        for s in &students {
            repo.insert_student(s.clone()).await;
        }

        let mut ids: Vec<Uuid> = students.iter().map(|s| s.id).collect();
        ids.push(ids[0]);
        ids.push(Uuid::new_v4());
        let result = repo
            .atomic_enroll(&AtomicEnrollRequest {
                class_id: class.id,
                student_ids: ids.clone(),
                enrolled_by: Uuid::new_v4(),
                school_id: school,
                enrollment_date: Utc::now(),
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(result.succeeded, vec![ids[0], ids[1]]);
        let errors: Vec<ErrorKind> = result.failed.iter().map(|f| f.error).collect();
        assert_eq!(
            errors,
            vec![
                ErrorKind::ClassCapacityExceeded,
                ErrorKind::StudentAlreadyEnrolled,
                ErrorKind::StudentNotFound
            ]
        );
        assert_eq!(repo.enrolled_count(class.id).await, 2);
    }

    #[tokio::test]
    async fn injected_faults_are_transient_and_counted() {
        let repo = MemoryRepository::new();
        repo.fail_next("find_class", 1);
        let err = repo.find_class(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_transient());
        assert!(repo.find_class(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pages_report_full_total() {
        let repo = MemoryRepository::new();
        let school = Uuid::new_v4();
        for i in 0..25 {
            repo.insert_student(sample_student(school, &format!("Student {:02}", i))).await;
        }
        let page = repo
            .available_students(&StudentQuery {
                school_id: school,
                class_id: Uuid::new_v4(),
                search: None,
                gender: None,
                boarding: None,
                sort: clamp_sort(None, None, &["name"], "name"),
                pagination: clamp_pagination(Some(2), Some(20)),
            })
            .await
            .unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.items[0].name, "Student 20");
    }
}
