use anyhow::{bail, Context};
use chrono::Duration;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::{router, AppState};
use crate::audit::{AuditRecorder, PgAuditSink, TracingAuditSink};
use crate::auth::{generate_jwt, Claims};
use crate::config::{config, AppConfig};
use crate::database::{ClassRepository, DatabaseManager, PgRepository};
use crate::retry::RetryPolicy;
use crate::testing::{sample_class, sample_student, sample_teacher, MemoryRepository};
use crate::types::Role;

#[derive(Parser)]
#[command(name = "classroom-enrollment")]
#[command(about = "Class enrollment API - capacity-checked, tenant-isolated enrollment")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the HTTP API")]
    Serve {
        #[arg(long, env = "ENROLLMENT_API_PORT", help = "Port to listen on (defaults to PORT or 3000)")]
        port: Option<u16>,

        #[arg(long, help = "Use a seeded in-memory store instead of Postgres")]
        memory: bool,
    },

    #[command(about = "Apply database migrations")]
    Migrate,

    #[command(about = "Mint a development bearer token for a caller id")]
    Token {
        #[arg(long)]
        caller: Uuid,

        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config();
    match cli.command {
        Commands::Serve { port, memory } => serve(config, port, memory).await,
        Commands::Migrate => migrate(config).await,
        Commands::Token { caller, hours } => {
            let token = generate_jwt(&Claims::new(caller, Duration::hours(hours)), &config.security.jwt_secret)?;
            println!("{}", token);
            Ok(())
        }
    }
}

async fn serve(config: &AppConfig, port: Option<u16>, memory: bool) -> anyhow::Result<()> {
    if config.security.jwt_secret.is_empty() {
        if crate::is_production!() {
            bail!("JWT_SECRET must be set in production");
        }
        bail!("JWT_SECRET is empty; every request would be rejected");
    }
    tracing::info!("Starting enrollment API in {:?} mode", config.environment);

    let (repo, audit): (Arc<dyn ClassRepository>, AuditRecorder) = if memory {
        let repo = Arc::new(MemoryRepository::new());
        seed_demo(&repo, &config.security.jwt_secret).await?;
        let audit = if config.security.enable_audit_logging {
            AuditRecorder::with_capacity(Arc::new(TracingAuditSink), config.security.audit_queue_capacity)
        } else {
            AuditRecorder::disabled()
        };
        (repo as Arc<dyn ClassRepository>, audit)
    } else {
        let pool = DatabaseManager::connect_lazy(&config.database)?;
        let audit = if config.security.enable_audit_logging {
            AuditRecorder::with_capacity(
                Arc::new(PgAuditSink::new(pool.clone())),
                config.security.audit_queue_capacity,
            )
        } else {
            AuditRecorder::disabled()
        };
        (Arc::new(PgRepository::new(pool)) as Arc<dyn ClassRepository>, audit)
    };

    let state = AppState::new(
        repo,
        audit.clone(),
        RetryPolicy::from(&config.retry),
        config.security.jwt_secret.as_str(),
    );
    let app = router(state);
    let app = if config.api.enable_request_logging {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    };

    let port = port.unwrap_or(config.api.port);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Enrollment API listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    audit.flush().await;
    tracing::info!("Enrollment API stopped");
    Ok(())
}

async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = DatabaseManager::connect_lazy(&config.database)?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");
    Ok(())
}

/// One school with a manager, a teacher, two classes and a few students.
/// Tokens for both staff members are logged.
async fn seed_demo(repo: &MemoryRepository, secret: &str) -> anyhow::Result<()> {
    let school = Uuid::new_v4();
    let manager = sample_teacher(school, Role::Management);
    let teacher = sample_teacher(school, Role::Teacher);
    repo.insert_teacher(manager.clone()).await;
    repo.insert_teacher(teacher.clone()).await;

    repo.insert_class(sample_class(school, Some(teacher.id), "Grade 7A", 30)).await;
    repo.insert_class(sample_class(school, None, "Grade 7B", 2)).await;
    for name in ["Ayu", "Budi", "Citra", "Dewi", "Eko", "Fajar"] {
        repo.insert_student(sample_student(school, name)).await;
    }

    for (label, profile) in [("management", &manager), ("teacher", &teacher)] {
        let token = generate_jwt(&Claims::new(profile.user_id, Duration::hours(24)), secret)?;
        tracing::info!("Demo {} token (caller {}): {}", label, profile.user_id, token);
    }
    Ok(())
}
