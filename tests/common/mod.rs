#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use classroom_enrollment::api::{router, AppState};
use classroom_enrollment::audit::AuditRecorder;
use classroom_enrollment::auth::{generate_jwt, Claims};
use classroom_enrollment::database::models::{ClassEntity, TeacherProfile};
use classroom_enrollment::retry::RetryPolicy;
use classroom_enrollment::testing::{
    sample_class, sample_student, sample_teacher, MemoryAuditSink, MemoryRepository,
};
use classroom_enrollment::types::{CallerContext, Role};

pub const SECRET: &str = "integration-test-secret";

/// One school with a manager and a teacher, backed by the in-memory store
pub struct World {
    pub repo: Arc<MemoryRepository>,
    pub audit_sink: Arc<MemoryAuditSink>,
    pub audit: AuditRecorder,
    pub state: AppState,
    pub school: Uuid,
    pub manager: TeacherProfile,
    pub teacher: TeacherProfile,
}

impl World {
    pub async fn new() -> Self {
        Self::with_retry(RetryPolicy::new(3, Duration::ZERO)).await
    }

    pub async fn with_retry(retry: RetryPolicy) -> Self {
        let repo = Arc::new(MemoryRepository::new());
        let audit_sink = Arc::new(MemoryAuditSink::new());
        let audit = AuditRecorder::spawn(audit_sink.clone());

        let school = Uuid::new_v4();
        let manager = sample_teacher(school, Role::Management);
        let teacher = sample_teacher(school, Role::Teacher);
        repo.insert_teacher(manager.clone()).await;
        repo.insert_teacher(teacher.clone()).await;

        let state = AppState::new(repo.clone(), audit.clone(), retry, SECRET);
        Self { repo, audit_sink, audit, state, school, manager, teacher }
    }

    pub async fn caller(&self, profile: &TeacherProfile) -> CallerContext {
        self.state
            .gate()
            .resolve_caller(profile.user_id)
            .await
            .expect("caller resolves")
    }

    pub async fn class(&self, teacher_id: Option<Uuid>, name: &str, capacity: i32) -> ClassEntity {
        let class = sample_class(self.school, teacher_id, name, capacity);
        self.repo.insert_class(class.clone()).await;
        class
    }

    pub async fn students(&self, count: usize) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let student = sample_student(self.school, &format!("Student {:02}", i));
            ids.push(student.id);
            self.repo.insert_student(student).await;
        }
        ids
    }

    /// A student enrolled at another school
    pub async fn foreign_student(&self) -> Uuid {
        let student = sample_student(Uuid::new_v4(), "Visitor");
        let id = student.id;
        self.repo.insert_student(student).await;
        id
    }

    pub fn token(&self, profile: &TeacherProfile) -> String {
        generate_jwt(&Claims::new(profile.user_id, chrono::Duration::hours(1)), SECRET).expect("token")
    }

    pub fn router(&self) -> Router {
        router(self.state.clone())
    }
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Ok((status, json))
}
