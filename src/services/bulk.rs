//! Best-effort fan-out over many classes.
//!
//! Each item is processed on its own: access is re-validated, the row is
//! re-read for the audit snapshot, and any error is recorded against that
//! item before moving on. Retries wrap single repository calls inside an
//! item, never the loop, so succeeded items are not repeated.

use uuid::Uuid;

use crate::database::models::{ClassChanges, ClassEntity};
use crate::error::EnrollmentError;
use crate::services::classes::ClassService;
use crate::types::{AccessOperation, BulkOutcome, CallerContext};

#[derive(Clone)]
pub struct BulkOrchestrator {
    classes: ClassService,
}

impl BulkOrchestrator {
    pub fn new(classes: ClassService) -> Self {
        Self { classes }
    }

    /// Run `op` for every id in input order, collecting one entry per id
    async fn for_each<F, Fut>(&self, operation: &str, class_ids: &[Uuid], mut op: F) -> BulkOutcome<Uuid>
    where
        F: FnMut(Uuid) -> Fut,
        Fut: std::future::Future<Output = Result<ClassEntity, EnrollmentError>>,
    {
        let mut outcome = BulkOutcome::new();
        for &class_id in class_ids {
            let result = op(class_id).await;
            match &result {
                Ok(_) => tracing::debug!("Bulk {}: class {} done", operation, class_id),
                Err(e) => tracing::debug!("Bulk {}: class {} failed: {}", operation, class_id, e),
            }
            outcome.record(class_id, result);
        }
        tracing::info!(
            "Bulk {} over {} classes: {} succeeded, {} failed",
            operation,
            class_ids.len(),
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome
    }

    pub async fn bulk_update(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
        changes: &ClassChanges,
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        // A caller without a profile cannot start the batch at all
        self.classes.gate().current_profile(caller).await?;
        Ok(self
            .for_each("update", class_ids, move |id| self.classes.update_class(caller, id, changes))
            .await)
    }

    /// Classes with live enrollments fail individually with `CLASS_HAS_STUDENTS`
    pub async fn bulk_soft_delete(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        self.classes.gate().current_profile(caller).await?;
        Ok(self
            .for_each("delete", class_ids, move |id| self.classes.soft_delete_class(caller, id))
            .await)
    }

    pub async fn bulk_restore(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        self.classes.gate().current_profile(caller).await?;
        Ok(self
            .for_each("restore", class_ids, move |id| self.classes.restore_class(caller, id))
            .await)
    }

    /// The new teacher is resolved once; an unknown teacher fails the whole
    /// batch. School mismatches fail per class.
    pub async fn bulk_reassign_teacher(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
        teacher_id: Uuid,
    ) -> Result<BulkOutcome<Uuid>, EnrollmentError> {
        self.classes.gate().current_profile(caller).await?;
        let teacher = self.classes.find_teacher(teacher_id).await?;
        let teacher = &teacher;
        Ok(self
            .for_each("reassign", class_ids, move |id| self.classes.reassign_to(caller, id, teacher))
            .await)
    }

    /// Every inaccessible id up front, as one aggregated denial
    pub async fn preflight_access(
        &self,
        caller: &CallerContext,
        class_ids: &[Uuid],
        operation: AccessOperation,
    ) -> Result<Vec<ClassEntity>, EnrollmentError> {
        self.classes
            .gate()
            .require_bulk_access(caller, class_ids, operation)
            .await
            .map_err(EnrollmentError::caller_facing)
    }
}
