use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::access::AccessGate;
use crate::audit::AuditRecorder;
use crate::database::ClassRepository;
use crate::handlers;
use crate::middleware::caller_auth_middleware;
use crate::retry::RetryPolicy;
use crate::services::{BulkOrchestrator, ClassService, EnrollmentService};

/// Shared handler state. Cheap to clone; every service holds `Arc`s.
#[derive(Clone)]
pub struct AppState {
    repo: Arc<dyn ClassRepository>,
    gate: AccessGate,
    classes: ClassService,
    enrollment: EnrollmentService,
    bulk: BulkOrchestrator,
    jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn ClassRepository>,
        audit: AuditRecorder,
        retry: RetryPolicy,
        jwt_secret: impl Into<Arc<str>>,
    ) -> Self {
        let gate = AccessGate::new(repo.clone(), retry.clone());
        let classes = ClassService::new(repo.clone(), gate.clone(), audit.clone(), retry.clone());
        let enrollment = EnrollmentService::new(repo.clone(), gate.clone(), audit, retry);
        let bulk = BulkOrchestrator::new(classes.clone());
        Self {
            repo,
            gate,
            classes,
            enrollment,
            bulk,
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn repo(&self) -> &Arc<dyn ClassRepository> {
        &self.repo
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn classes(&self) -> &ClassService {
        &self.classes
    }

    pub fn enrollment(&self) -> &EnrollmentService {
        &self.enrollment
    }

    pub fn bulk(&self) -> &BulkOrchestrator {
        &self.bulk
    }

    pub fn jwt_secret(&self) -> &str {
        &self.jwt_secret
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(class_routes())
        .merge(bulk_routes())
        .merge(enrollment_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), caller_auth_middleware));

    Router::new()
        // Public
        .route("/health", get(handlers::health::health))
        .merge(protected)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn class_routes() -> Router<AppState> {
    use handlers::classes;

    Router::new()
        .route("/api/classes", get(classes::list).post(classes::create))
        .route("/api/classes/:id", get(classes::show).patch(classes::update))
}

fn bulk_routes() -> Router<AppState> {
    use handlers::bulk;

    Router::new()
        .route("/api/classes/bulk/update", post(bulk::update))
        .route("/api/classes/bulk/delete", post(bulk::soft_delete))
        .route("/api/classes/bulk/restore", post(bulk::restore))
        .route("/api/classes/bulk/reassign", post(bulk::reassign))
        .route("/api/classes/bulk/access", post(bulk::access))
}

fn enrollment_routes() -> Router<AppState> {
    use handlers::enrollment;

    Router::new()
        .route(
            "/api/classes/:id/students",
            get(enrollment::roster).post(enrollment::enroll),
        )
        .route("/api/classes/:id/students/bulk", post(enrollment::bulk_enroll))
        .route("/api/classes/:id/students/remove", post(enrollment::bulk_remove))
        .route("/api/classes/:id/students/:student_id", delete(enrollment::remove))
        .route("/api/classes/:id/available-students", get(enrollment::available))
}
