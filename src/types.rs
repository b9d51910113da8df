/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EnrollmentError, ErrorKind};

/// Caller role as resolved from the teacher profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "teacher_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Management,
}

/// Resolved identity of the caller, passed explicitly through every operation.
///
/// Built once per request by the access gate from the opaque caller id. The
/// gate still re-reads the profile on every access check, so a stale context
/// can never widen permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub caller_id: Uuid,
    pub teacher_id: Uuid,
    pub school_id: Uuid,
    pub role: Role,
}

/// Operations gated by the access control layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOperation {
    Read,
    Enroll,
    Remove,
    Update,
    Delete,
    Restore,
    Reassign,
    /// Creation is tenant-targeted: the target school must be the caller's.
    Create { school_id: Uuid },
}

impl AccessOperation {
    /// Restore is the only operation allowed to see soft-deleted classes
    pub fn sees_deleted(&self) -> bool {
        matches!(self, AccessOperation::Restore)
    }
}

/// One failed item of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFailure<T> {
    pub item: T,
    pub error: ErrorKind,
    pub detail: String,
}

/// Partitioned result of a bulk request. Every input item lands in exactly
/// one of the two lists, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BulkFailure<T>>,
}

impl<T> Default for BulkOutcome<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BulkOutcome<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed(&mut self, item: T) {
        self.succeeded.push(item);
    }

    pub fn fail(&mut self, item: T, error: ErrorKind, detail: impl Into<String>) {
        self.failed.push(BulkFailure {
            item,
            error,
            detail: detail.into(),
        });
    }

    /// Record the result of processing one item
    pub fn record<R>(&mut self, item: T, result: Result<R, EnrollmentError>) {
        match result {
            Ok(_) => self.succeed(item),
            Err(err) => {
                let err = err.caller_facing();
                self.fail(item, err.kind(), err.to_string());
            }
        }
    }

    /// Number of items accounted for
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &T> {
        self.failed.iter().map(|f| &f.item)
    }
}
