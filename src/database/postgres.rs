use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::{
    AtomicEnrollRequest, AtomicEnrollResult, ClassChanges, ClassEntity, EnrollFailure,
    EnrollmentRecord, NewClass, RowChange, Student, TeacherProfile,
};
use crate::database::query_builder::{
    available_students_sql, bind_param_query, bind_param_query_as, class_list_sql, SqlResult,
};
use crate::database::repository::{ClassQuery, ClassRepository, Page, StudentQuery};
use crate::error::ErrorKind;

/// One row returned by `atomic_enroll_students`
#[derive(Debug, FromRow)]
struct AtomicEnrollRow {
    student_id: Uuid,
    error_code: Option<String>,
}

/// Check run against the locked class row before a single-row write
enum Precondition {
    None,
    /// Refuse while any enrollment is live
    NoEnrollments,
    /// Refuse a new capacity below the live enrollment count
    CapacityCovers(Option<i32>),
}

/// `ClassRepository` backed by Postgres
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_page<T>(&self, select: SqlResult, count: SqlResult) -> Result<Page<T>, DatabaseError>
    where
        T: for<'r> FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let mut q = sqlx::query_as::<_, T>(&select.query);
        for p in select.params.iter() {
            q = bind_param_query_as(q, p);
        }
        let items = q.fetch_all(&self.pool).await?;

        let mut c = sqlx::query(&count.query);
        for p in count.params.iter() {
            c = bind_param_query(c, p);
        }
        let row = c.fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("count")?;

        Ok(Page { items, total })
    }

    /// Lock the class row and return it as the audit "before" state
    async fn lock_class(
        tx: &mut Transaction<'_, Postgres>,
        class_id: Uuid,
    ) -> Result<Option<ClassEntity>, DatabaseError> {
        let row = sqlx::query_as::<_, ClassEntity>("SELECT * FROM classes WHERE id = $1 FOR UPDATE")
            .bind(class_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row)
    }

    /// Live enrollments of a class, counted inside the caller's transaction
    async fn count_locked(tx: &mut Transaction<'_, Postgres>, class_id: Uuid) -> Result<i64, DatabaseError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM class_enrollments WHERE class_id = $1")
            .bind(class_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Run `UPDATE … RETURNING *` against a locked row inside one transaction.
    /// The precondition is checked while the row lock is held; `atomic_enroll`
    /// takes the same lock.
    async fn locked_update<'a>(
        &self,
        class_id: Uuid,
        precondition: Precondition,
        sql: &'a str,
        bind: impl FnOnce(
            sqlx::query::QueryAs<'a, Postgres, ClassEntity, sqlx::postgres::PgArguments>,
        ) -> sqlx::query::QueryAs<'a, Postgres, ClassEntity, sqlx::postgres::PgArguments>,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let Some(before) = Self::lock_class(&mut tx, class_id).await? else {
            tx.rollback().await?;
            return Ok(None);
        };

        let refusal = match precondition {
            Precondition::None => None,
            Precondition::NoEnrollments => {
                let enrolled = Self::count_locked(&mut tx, class_id).await?;
                (enrolled > 0).then_some(DatabaseError::HasEnrollments(enrolled))
            }
            Precondition::CapacityCovers(Some(capacity)) => {
                let enrolled = Self::count_locked(&mut tx, class_id).await?;
                (enrolled > i64::from(capacity)).then_some(DatabaseError::CapacityBelowEnrollment(enrolled))
            }
            Precondition::CapacityCovers(None) => None,
        };
        if let Some(err) = refusal {
            tx.rollback().await?;
            return Err(err);
        }

        let after = bind(sqlx::query_as::<_, ClassEntity>(sql))
            .fetch_one(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tx.commit().await?;

        Ok(Some(RowChange { before, after }))
    }
}

#[async_trait]
impl ClassRepository for PgRepository {
    async fn find_profile_by_user(&self, user_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        let profile = sqlx::query_as::<_, TeacherProfile>(
            "SELECT id, user_id, school_id, name, role FROM teachers WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn find_teacher(&self, teacher_id: Uuid) -> Result<Option<TeacherProfile>, DatabaseError> {
        let profile = sqlx::query_as::<_, TeacherProfile>(
            "SELECT id, user_id, school_id, name, role FROM teachers WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(teacher_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn find_class(&self, class_id: Uuid) -> Result<Option<ClassEntity>, DatabaseError> {
        let class = sqlx::query_as::<_, ClassEntity>("SELECT * FROM classes WHERE id = $1")
            .bind(class_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(class)
    }

    async fn find_class_by_name(&self, school_id: Uuid, name: &str) -> Result<Option<ClassEntity>, DatabaseError> {
        let class = sqlx::query_as::<_, ClassEntity>(
            "SELECT * FROM classes WHERE school_id = $1 AND lower(name) = lower($2) AND deleted_at IS NULL",
        )
        .bind(school_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(class)
    }

    async fn list_classes(&self, query: &ClassQuery) -> Result<Page<ClassEntity>, DatabaseError> {
        let (select, count) = class_list_sql(query);
        self.fetch_page(select, count).await
    }

    async fn create_class(&self, new_class: &NewClass) -> Result<ClassEntity, DatabaseError> {
        let class = sqlx::query_as::<_, ClassEntity>(
            "INSERT INTO classes (school_id, teacher_id, name, description, student_capacity)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(new_class.school_id)
        .bind(new_class.teacher_id)
        .bind(&new_class.name)
        .bind(&new_class.description)
        .bind(new_class.student_capacity)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(class)
    }

    async fn update_class(
        &self,
        class_id: Uuid,
        changes: &ClassChanges,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        let sql = "UPDATE classes SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                student_capacity = COALESCE($4, student_capacity),
                status = COALESCE($5, status),
                updated_at = now()
             WHERE id = $1
             RETURNING *";
        self.locked_update(class_id, Precondition::CapacityCovers(changes.student_capacity), sql, |q| {
            q.bind(class_id)
                .bind(changes.name.clone())
                .bind(changes.description.clone())
                .bind(changes.student_capacity)
                .bind(changes.status)
        })
        .await
    }

    async fn assign_teacher(
        &self,
        class_id: Uuid,
        teacher_id: Uuid,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        let sql = "UPDATE classes SET teacher_id = $2, updated_at = now() WHERE id = $1 RETURNING *";
        self.locked_update(class_id, Precondition::None, sql, |q| q.bind(class_id).bind(teacher_id))
            .await
    }

    async fn soft_delete_class(
        &self,
        class_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        let sql = "UPDATE classes SET status = 'archived', deleted_at = $2, updated_at = now()
                   WHERE id = $1 RETURNING *";
        self.locked_update(class_id, Precondition::NoEnrollments, sql, |q| q.bind(class_id).bind(at))
            .await
    }

    async fn restore_class(&self, class_id: Uuid) -> Result<Option<RowChange<ClassEntity>>, DatabaseError> {
        let sql = "UPDATE classes SET status = 'active', deleted_at = NULL, updated_at = now()
                   WHERE id = $1 RETURNING *";
        self.locked_update(class_id, Precondition::None, sql, |q| q.bind(class_id))
            .await
    }

    async fn find_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(
            "SELECT class_id, student_id, enrollment_date, notes, enrolled_by
             FROM class_enrollments WHERE class_id = $1 AND student_id = $2",
        )
        .bind(class_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_enrollments(&self, class_id: Uuid) -> Result<Vec<EnrollmentRecord>, DatabaseError> {
        let records = sqlx::query_as::<_, EnrollmentRecord>(
            "SELECT class_id, student_id, enrollment_date, notes, enrolled_by
             FROM class_enrollments WHERE class_id = $1
             ORDER BY enrollment_date ASC, student_id ASC",
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn delete_enrollment(
        &self,
        class_id: Uuid,
        student_id: Uuid,
    ) -> Result<Option<EnrollmentRecord>, DatabaseError> {
        let record = sqlx::query_as::<_, EnrollmentRecord>(
            "DELETE FROM class_enrollments WHERE class_id = $1 AND student_id = $2
             RETURNING class_id, student_id, enrollment_date, notes, enrolled_by",
        )
        .bind(class_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn atomic_enroll(&self, request: &AtomicEnrollRequest) -> Result<AtomicEnrollResult, DatabaseError> {
        let rows = sqlx::query_as::<_, AtomicEnrollRow>(
            "SELECT student_id, error_code FROM atomic_enroll_students($1, $2, $3, $4, $5, $6)",
        )
        .bind(request.class_id)
        .bind(&request.student_ids)
        .bind(request.enrolled_by)
        .bind(request.school_id)
        .bind(request.enrollment_date)
        .bind(&request.notes)
        .fetch_all(&self.pool)
        .await?;

        let mut result = AtomicEnrollResult::default();
        for row in rows {
            match row.error_code {
                None => result.succeeded.push(row.student_id),
                Some(code) => result.failed.push(EnrollFailure {
                    student_id: row.student_id,
                    error: ErrorKind::from_code(&code),
                }),
            }
        }
        Ok(result)
    }

    async fn available_students(&self, query: &StudentQuery) -> Result<Page<Student>, DatabaseError> {
        let (select, count) = available_students_sql(query);
        self.fetch_page(select, count).await
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        DatabaseManager::health_check(&self.pool).await
    }
}
