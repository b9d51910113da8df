use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::AccessGate;
use crate::audit::{AuditAction, AuditEntity, AuditRecorder};
use crate::database::models::{ClassChanges, ClassEntity, ClassStatus, NewClass, RowChange, TeacherProfile};
use crate::database::repository::CLASS_SORT_COLUMNS;
use crate::database::{ClassQuery, ClassRepository, DatabaseError};
use crate::error::EnrollmentError;
use crate::retry::RetryPolicy;
use crate::sanitize::{clamp_pagination, clamp_sort, clean_optional_search};
use crate::types::{AccessOperation, CallerContext, Role};

pub const MAX_CLASS_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateClass {
    /// Defaults to the caller's school
    pub school_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub student_capacity: i32,
    pub teacher_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassListParams {
    pub search: Option<String>,
    pub status: Option<ClassStatus>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassList {
    pub classes: Vec<ClassEntity>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

fn check_name(name: &str) -> Result<String, EnrollmentError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EnrollmentError::InvalidInput("class name must not be empty".into()));
    }
    if name.chars().count() > MAX_CLASS_NAME_LENGTH {
        return Err(EnrollmentError::InvalidInput(format!(
            "class name must be at most {} characters",
            MAX_CLASS_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

fn check_capacity(capacity: i32) -> Result<(), EnrollmentError> {
    if capacity < 1 {
        return Err(EnrollmentError::InvalidInput("student_capacity must be positive".into()));
    }
    Ok(())
}

/// Unique-name violations raised by the store become `DUPLICATE_CLASS_NAME`
fn name_conflict(err: DatabaseError, school_id: Uuid, name: &str) -> EnrollmentError {
    match err {
        DatabaseError::Conflict(_) => EnrollmentError::DuplicateClassName {
            school_id,
            name: name.to_string(),
        },
        other => other.into(),
    }
}

/// Single-class lifecycle operations. The bulk orchestrator runs each of its
/// items through the same methods.
#[derive(Clone)]
pub struct ClassService {
    repo: Arc<dyn ClassRepository>,
    gate: AccessGate,
    audit: AuditRecorder,
    retry: RetryPolicy,
}

impl ClassService {
    pub fn new(
        repo: Arc<dyn ClassRepository>,
        gate: AccessGate,
        audit: AuditRecorder,
        retry: RetryPolicy,
    ) -> Self {
        Self { repo, gate, audit, retry }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    fn audit_change(&self, caller: &CallerContext, action: AuditAction, change: &RowChange<ClassEntity>) {
        self.audit.record(
            AuditEntity::Class,
            change.after.id.to_string(),
            action,
            Some(&change.before),
            Some(&change.after),
            caller.caller_id,
        );
    }

    /// Another live class of the school already uses `name`
    async fn ensure_name_free(
        &self,
        school_id: Uuid,
        name: &str,
        except: Option<Uuid>,
    ) -> Result<(), EnrollmentError> {
        let repo = &self.repo;
        let existing = self
            .retry
            .run("find_class_by_name", move || repo.find_class_by_name(school_id, name))
            .await?;
        match existing {
            Some(other) if Some(other.id) != except => Err(EnrollmentError::DuplicateClassName {
                school_id,
                name: name.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub async fn find_teacher(&self, teacher_id: Uuid) -> Result<TeacherProfile, EnrollmentError> {
        let repo = &self.repo;
        self.retry
            .run("find_teacher", move || repo.find_teacher(teacher_id))
            .await?
            .ok_or(EnrollmentError::TeacherNotFound(teacher_id))
    }

    pub async fn create_class(
        &self,
        caller: &CallerContext,
        data: CreateClass,
    ) -> Result<ClassEntity, EnrollmentError> {
        let school_id = data.school_id.unwrap_or(caller.school_id);
        let profile = self.gate.require_create(caller, school_id).await?;
        let name = check_name(&data.name)?;
        check_capacity(data.student_capacity)?;

        // Teachers create classes for themselves
        let teacher_id = match (data.teacher_id, profile.role) {
            (Some(id), _) => Some(id),
            (None, Role::Teacher) => Some(profile.id),
            (None, Role::Management) => None,
        };
        if let Some(teacher_id) = teacher_id {
            let teacher = self.find_teacher(teacher_id).await?;
            if teacher.school_id != school_id {
                return Err(EnrollmentError::SchoolMismatch {
                    class_school: school_id,
                    teacher_school: teacher.school_id,
                });
            }
        }
        self.ensure_name_free(school_id, &name, None).await?;

        let new_class = NewClass {
            school_id,
            name,
            description: data.description,
            student_capacity: data.student_capacity,
            teacher_id,
        };
        let class = self
            .repo
            .create_class(&new_class)
            .await
            .map_err(|e| name_conflict(e, school_id, &new_class.name))?;

        self.audit.record(
            AuditEntity::Class,
            class.id.to_string(),
            AuditAction::Create,
            None,
            Some(&class),
            caller.caller_id,
        );
        tracing::info!("Created class {} ({}) in school {}", class.id, class.name, school_id);
        Ok(class)
    }

    pub async fn get_class(&self, caller: &CallerContext, class_id: Uuid) -> Result<ClassEntity, EnrollmentError> {
        self.gate.require_access(caller, class_id, AccessOperation::Read).await
    }

    /// Live classes of the caller's school; teachers only see their own
    pub async fn list_classes(
        &self,
        caller: &CallerContext,
        params: ClassListParams,
    ) -> Result<ClassList, EnrollmentError> {
        let profile = self.gate.current_profile(caller).await?;
        let query = ClassQuery {
            school_id: profile.school_id,
            teacher_id: match profile.role {
                Role::Teacher => Some(profile.id),
                Role::Management => None,
            },
            status: params.status,
            search: clean_optional_search(params.search.as_deref()),
            sort: clamp_sort(
                params.sort_by.as_deref(),
                params.sort_order.as_deref(),
                CLASS_SORT_COLUMNS,
                "name",
            ),
            pagination: clamp_pagination(params.page, params.limit),
        };
        let repo = &self.repo;
        let query_ref = &query;
        let page = self
            .retry
            .run("list_classes", move || repo.list_classes(query_ref))
            .await?;
        Ok(ClassList {
            classes: page.items,
            total: page.total,
            page: query.pagination.page,
            limit: query.pagination.limit,
        })
    }

    pub async fn update_class(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        changes: &ClassChanges,
    ) -> Result<ClassEntity, EnrollmentError> {
        if changes.is_empty() {
            return Err(EnrollmentError::InvalidInput("no fields to update".into()));
        }
        let mut changes = changes.clone();
        if let Some(name) = &changes.name {
            changes.name = Some(check_name(name)?);
        }
        if let Some(capacity) = changes.student_capacity {
            check_capacity(capacity)?;
        }
        if changes.status == Some(ClassStatus::Archived) {
            return Err(EnrollmentError::InvalidInput(
                "classes are archived by soft delete, not by status update".into(),
            ));
        }

        let class = self.gate.require_access(caller, class_id, AccessOperation::Update).await?;
        if let Some(name) = &changes.name {
            self.ensure_name_free(class.school_id, name, Some(class_id)).await?;
        }

        let change = self
            .repo
            .update_class(class_id, &changes)
            .await
            .map_err(|e| match e {
                DatabaseError::CapacityBelowEnrollment(enrolled) => EnrollmentError::InvalidInput(format!(
                    "student_capacity is below the {} students already enrolled",
                    enrolled
                )),
                other => name_conflict(other, class.school_id, changes.name.as_deref().unwrap_or(&class.name)),
            })?
            .ok_or(EnrollmentError::ClassNotFound(class_id))?;

        self.audit_change(caller, AuditAction::Update, &change);
        tracing::info!("Updated class {}", class_id);
        Ok(change.after)
    }

    /// Soft delete. A class with live enrollments is refused.
    pub async fn soft_delete_class(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
    ) -> Result<ClassEntity, EnrollmentError> {
        self.gate.require_access(caller, class_id, AccessOperation::Delete).await?;

        // The enrollment check runs in the store under the class row lock
        let change = self
            .repo
            .soft_delete_class(class_id, Utc::now())
            .await
            .map_err(|e| match e {
                DatabaseError::HasEnrollments(enrolled) => EnrollmentError::ClassHasStudents { class_id, enrolled },
                other => other.into(),
            })?
            .ok_or(EnrollmentError::ClassNotFound(class_id))?;

        self.audit_change(caller, AuditAction::Delete, &change);
        tracing::info!("Soft-deleted class {}", class_id);
        Ok(change.after)
    }

    /// Restoring a class that is not deleted returns it unchanged
    pub async fn restore_class(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
    ) -> Result<ClassEntity, EnrollmentError> {
        let class = self.gate.require_access(caller, class_id, AccessOperation::Restore).await?;
        if !class.is_deleted() {
            return Ok(class);
        }
        self.ensure_name_free(class.school_id, &class.name, Some(class_id)).await?;

        let change = self
            .repo
            .restore_class(class_id)
            .await
            .map_err(|e| name_conflict(e, class.school_id, &class.name))?
            .ok_or(EnrollmentError::ClassNotFound(class_id))?;

        self.audit_change(caller, AuditAction::Restore, &change);
        tracing::info!("Restored class {}", class_id);
        Ok(change.after)
    }

    pub async fn reassign_teacher(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<ClassEntity, EnrollmentError> {
        let teacher = self.find_teacher(teacher_id).await?;
        self.reassign_to(caller, class_id, &teacher).await
    }

    /// Reassign to an already resolved teacher, who must share the class's school
    pub async fn reassign_to(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        teacher: &TeacherProfile,
    ) -> Result<ClassEntity, EnrollmentError> {
        let class = self.gate.require_access(caller, class_id, AccessOperation::Reassign).await?;
        if teacher.school_id != class.school_id {
            return Err(EnrollmentError::SchoolMismatch {
                class_school: class.school_id,
                teacher_school: teacher.school_id,
            });
        }

        let change = self
            .repo
            .assign_teacher(class_id, teacher.id)
            .await?
            .ok_or(EnrollmentError::ClassNotFound(class_id))?;

        self.audit_change(caller, AuditAction::Reassign, &change);
        tracing::info!("Reassigned class {} to teacher {}", class_id, teacher.id);
        Ok(change.after)
    }
}
