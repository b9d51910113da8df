//! Access control gate.
//!
//! Every check re-reads the caller's profile and the target class from the
//! repository. Nothing is cached between calls, so a permission revoked
//! between a listing and a mutation is honoured by the mutation.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::database::models::{ClassEntity, TeacherProfile};
use crate::database::ClassRepository;
use crate::error::EnrollmentError;
use crate::retry::RetryPolicy;
use crate::types::{AccessOperation, CallerContext, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Teacher-role caller is not the class's assigned teacher
    NotAssigned,
    /// Class belongs to another school
    OtherSchool,
    /// Creation targets a school other than the caller's
    TargetSchool,
    /// Class does not exist or is soft-deleted
    Missing,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenialReason::NotAssigned => "caller is not assigned to the class",
            DenialReason::OtherSchool => "class belongs to another school",
            DenialReason::TargetSchool => "target school is not the caller's school",
            DenialReason::Missing => "class not found",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    Allowed(ClassEntity),
    Denied(DenialReason),
}

/// Pure access rule for a resolved profile against a class.
///
/// Management may act on any class of its own school. Teachers may act only
/// on classes assigned to them. Creation ignores the class and compares the
/// target school with the caller's school.
pub fn evaluate(
    profile: &TeacherProfile,
    class: &ClassEntity,
    operation: AccessOperation,
) -> Result<(), DenialReason> {
    if let AccessOperation::Create { school_id } = operation {
        return evaluate_create(profile, school_id);
    }
    if class.school_id != profile.school_id {
        return Err(DenialReason::OtherSchool);
    }
    match profile.role {
        Role::Management => Ok(()),
        Role::Teacher if class.teacher_id == Some(profile.id) => Ok(()),
        Role::Teacher => Err(DenialReason::NotAssigned),
    }
}

pub fn evaluate_create(profile: &TeacherProfile, target_school: Uuid) -> Result<(), DenialReason> {
    if profile.school_id == target_school {
        Ok(())
    } else {
        Err(DenialReason::TargetSchool)
    }
}

fn denied(class_ids: Vec<Uuid>, reason: impl fmt::Display) -> EnrollmentError {
    EnrollmentError::AccessDenied {
        class_ids,
        reason: reason.to_string(),
    }
}

#[derive(Clone)]
pub struct AccessGate {
    repo: Arc<dyn ClassRepository>,
    retry: RetryPolicy,
}

impl AccessGate {
    pub fn new(repo: Arc<dyn ClassRepository>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    /// Build the caller context for an authenticated user id
    pub async fn resolve_caller(&self, caller_id: Uuid) -> Result<CallerContext, EnrollmentError> {
        let profile = self.load_profile(caller_id).await?;
        Ok(CallerContext {
            caller_id,
            teacher_id: profile.id,
            school_id: profile.school_id,
            role: profile.role,
        })
    }

    /// Current profile of the caller, re-read from the store
    pub async fn current_profile(&self, caller: &CallerContext) -> Result<TeacherProfile, EnrollmentError> {
        self.load_profile(caller.caller_id).await
    }

    async fn load_profile(&self, caller_id: Uuid) -> Result<TeacherProfile, EnrollmentError> {
        let repo = &self.repo;
        self.retry
            .run("find_profile_by_user", move || repo.find_profile_by_user(caller_id))
            .await?
            .ok_or(EnrollmentError::TeacherNotFound(caller_id))
    }

    /// Class visible to `operation`, or `None`. Only restore sees soft-deleted rows.
    async fn load_class(
        &self,
        class_id: Uuid,
        operation: AccessOperation,
    ) -> Result<Option<ClassEntity>, EnrollmentError> {
        let repo = &self.repo;
        let class = self
            .retry
            .run("find_class", move || repo.find_class(class_id))
            .await?;
        Ok(class.filter(|c| operation.sees_deleted() || !c.is_deleted()))
    }

    pub async fn check_access(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        operation: AccessOperation,
    ) -> Result<AccessDecision, EnrollmentError> {
        let profile = self.current_profile(caller).await?;
        let Some(class) = self.load_class(class_id, operation).await? else {
            return Ok(AccessDecision::Denied(DenialReason::Missing));
        };
        Ok(match evaluate(&profile, &class, operation) {
            Ok(()) => AccessDecision::Allowed(class),
            Err(reason) => AccessDecision::Denied(reason),
        })
    }

    /// Like `check_access`, but raises. A missing class is reported as
    /// `CLASS_NOT_FOUND` rather than a denial.
    pub async fn require_access(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
        operation: AccessOperation,
    ) -> Result<ClassEntity, EnrollmentError> {
        match self.check_access(caller, class_id, operation).await? {
            AccessDecision::Allowed(class) => Ok(class),
            AccessDecision::Denied(DenialReason::Missing) => Err(EnrollmentError::ClassNotFound(class_id)),
            AccessDecision::Denied(reason) => {
                tracing::warn!(
                    "Access denied: caller {} {:?} class {}: {}",
                    caller.caller_id, operation, class_id, reason
                );
                Err(denied(vec![class_id], reason))
            }
        }
    }

    /// Enrollment variant of `require_access`. A class of another school is a
    /// tenant violation, `CROSS_SCHOOL_ENROLLMENT`, decided from the freshly
    /// read profile and class rather than any caller-supplied school.
    pub async fn require_enroll_access(
        &self,
        caller: &CallerContext,
        class_id: Uuid,
    ) -> Result<ClassEntity, EnrollmentError> {
        let profile = self.current_profile(caller).await?;
        let Some(class) = self.load_class(class_id, AccessOperation::Enroll).await? else {
            return Err(EnrollmentError::ClassNotFound(class_id));
        };
        match evaluate(&profile, &class, AccessOperation::Enroll) {
            Ok(()) => Ok(class),
            Err(DenialReason::OtherSchool) => {
                tracing::warn!(
                    "Cross-school enrollment refused: caller {} (school {}) class {} (school {})",
                    caller.caller_id, profile.school_id, class_id, class.school_id
                );
                Err(EnrollmentError::CrossSchoolEnrollment {
                    class_school: class.school_id,
                    caller_school: profile.school_id,
                })
            }
            Err(reason) => {
                tracing::warn!(
                    "Access denied: caller {} {:?} class {}: {}",
                    caller.caller_id, AccessOperation::Enroll, class_id, reason
                );
                Err(denied(vec![class_id], reason))
            }
        }
    }

    /// Creation rule: the caller may only create inside its own school
    pub async fn require_create(
        &self,
        caller: &CallerContext,
        target_school: Uuid,
    ) -> Result<TeacherProfile, EnrollmentError> {
        let profile = self.current_profile(caller).await?;
        evaluate_create(&profile, target_school).map_err(|reason| {
            tracing::warn!(
                "Access denied: caller {} create in school {}: {}",
                caller.caller_id, target_school, reason
            );
            denied(vec![], reason)
        })?;
        Ok(profile)
    }

    /// Check every id and raise one denial naming all inaccessible classes
    pub async fn require_bulk_access(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
        operation: AccessOperation,
    ) -> Result<Vec<ClassEntity>, EnrollmentError> {
        let profile = self.current_profile(caller).await?;

        let mut allowed = Vec::with_capacity(class_ids.len());
        let mut denied_ids = Vec::new();
        let mut reasons: Vec<DenialReason> = Vec::new();
        for &class_id in class_ids {
            let decision = match self.load_class(class_id, operation).await? {
                None => Err(DenialReason::Missing),
                Some(class) => evaluate(&profile, &class, operation).map(|_| class),
            };
            match decision {
                Ok(class) => allowed.push(class),
                Err(reason) => {
                    denied_ids.push(class_id);
                    if !reasons.contains(&reason) {
                        reasons.push(reason);
                    }
                }
            }
        }

        if denied_ids.is_empty() {
            return Ok(allowed);
        }
        let reason = reasons.iter().map(|r| r.to_string()).collect::<Vec<_>>().join("; ");
        tracing::warn!(
            "Bulk access denied: caller {} {:?} on {} of {} classes",
            caller.caller_id,
            operation,
            denied_ids.len(),
            class_ids.len()
        );
        Err(denied(denied_ids, reason))
    }
}
