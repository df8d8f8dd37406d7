mod backup;
mod config;
mod db;
mod error;
mod logging;
mod shutdown;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use backup::schedule::{CronCalculator, ScheduleCalculator};
use backup::scheduler::{BackupScheduler, SchedulerStatus};
use backup::service::LocalBackupService;
use backup::sweeper::CleanupSweeper;
use backup::{BackupJob, BackupService};
use db::Database;
use error::ApiError;
use pensieve_common::{BackupRecord, TenantBackupSettings};
use shutdown::ShutdownCoordinator;

#[derive(Clone)]
struct AppState {
    database: Arc<Database>,
    scheduler: Arc<BackupScheduler>,
    backup_service: Arc<dyn BackupService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let pensieve_config = config::PensieveConfig::load();
    if let Err(e) = pensieve_config.validate() {
        return Err(anyhow::anyhow!("Invalid configuration: {}", e));
    }

    // Initialize tracing; the guard must outlive the server
    let _log_guard = logging::init(&pensieve_config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    info!("Configuration loaded successfully");

    // Initialize database; an unreachable job store is fatal, running with
    // partial state is not an option
    let database = Arc::new(
        Database::new(
            &pensieve_config.database.url,
            pensieve_config.database.max_connections,
        )
        .await?,
    );
    database.migrate().await?;
    info!("Database initialized");

    // Wire the scheduler
    let calculator: Arc<dyn ScheduleCalculator> = Arc::new(CronCalculator::new());
    let backup_service: Arc<dyn BackupService> = Arc::new(LocalBackupService::new(
        Arc::clone(&database),
        pensieve_config.scheduler.data_dir.clone(),
    ));
    let scheduler = Arc::new(BackupScheduler::new(
        Arc::clone(&database),
        Arc::clone(&backup_service),
        Arc::clone(&calculator),
    ));

    // Recovery: rebuild timers from persisted active jobs. On failure the
    // scheduler stays uninitialized and reports itself disabled while the
    // HTTP surface keeps serving.
    if let Err(e) = scheduler.recover().await {
        error!("Backup scheduler recovery failed, scheduling disabled: {}", e);
    }

    // Retention sweeper, independent of per-tenant job timers
    let coordinator = ShutdownCoordinator::new();
    let sweeper = Arc::new(CleanupSweeper::new(
        Arc::clone(&database),
        Arc::clone(&backup_service),
        Arc::clone(&calculator),
        pensieve_config.scheduler.cleanup_schedule.clone(),
    ));
    let sweeper_handle = backup::sweeper::spawn(sweeper, coordinator.subscribe());

    let state = AppState {
        database: Arc::clone(&database),
        scheduler: Arc::clone(&scheduler),
        backup_service,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/scheduler/status", get(scheduler_status))
        .route(
            "/api/v1/tenants/:tenant_id/backup-jobs",
            post(create_backup_job).get(list_backup_jobs),
        )
        .route(
            "/api/v1/tenants/:tenant_id/backup-jobs/:job_id",
            delete(cancel_backup_job),
        )
        .route("/api/v1/tenants/:tenant_id/backups", get(list_tenant_backups))
        .route(
            "/api/v1/tenants/:tenant_id/backup-settings",
            get(get_backup_settings).put(put_backup_settings),
        )
        .with_state(state);

    let addr: SocketAddr = format!(
        "{}:{}",
        pensieve_config.server.host, pensieve_config.server.port
    )
    .parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("Pensieve API listening on {}", addr);

    let signal_coordinator = coordinator.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal_coordinator.wait_for_signal().await;
        })
        .await?;

    coordinator
        .drain(|| async {
            scheduler.shutdown().await;
            sweeper_handle.abort();
            database.close().await;
        })
        .await;

    Ok(())
}

// --- Request/response types ---

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    schedule_expression: String,
    name_template: Option<String>,
    requested_by: Option<String>,
    include_extended_data: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    job_id: i64,
}

#[derive(Debug, Serialize)]
struct CancelJobResponse {
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct ListBackupsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct UpdateSettingsRequest {
    is_enabled: bool,
    include_extended_data: Option<bool>,
    retention_days: Option<u32>,
    max_backup_count: Option<u32>,
    auto_backup_enabled: Option<bool>,
    auto_backup_interval_hours: Option<u32>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    scheduler_initialized: bool,
    timestamp: i64,
}

// --- Handlers ---

async fn create_backup_job(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    ensure_scheduler_ready(&state)?;

    let name_template = req.name_template.unwrap_or_else(|| "Backup".to_string());
    let requested_by = req.requested_by.unwrap_or_else(|| "operator".to_string());

    let job_id = state
        .scheduler
        .schedule_job(
            &tenant_id,
            &req.schedule_expression,
            &name_template,
            &requested_by,
            req.include_extended_data,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(CreateJobResponse { job_id })))
}

async fn cancel_backup_job(
    State(state): State<AppState>,
    Path((tenant_id, job_id)): Path<(String, i64)>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    ensure_scheduler_ready(&state)?;

    let cancelled = state.scheduler.cancel_job(job_id, &tenant_id).await;
    Ok(Json(CancelJobResponse { cancelled }))
}

async fn list_backup_jobs(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<BackupJob>>, ApiError> {
    let jobs = state.scheduler.list_jobs(&tenant_id).await?;
    Ok(Json(jobs))
}

async fn list_tenant_backups(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Query(query): Query<ListBackupsQuery>,
) -> Result<Json<Vec<BackupRecord>>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    let records = state.backup_service.get_tenant_backups(&tenant_id, limit).await?;
    Ok(Json(records))
}

async fn get_backup_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<TenantBackupSettings>, ApiError> {
    match db::settings::get_settings(state.database.pool(), &tenant_id).await? {
        Some(settings) => Ok(Json(settings)),
        None => Err(ApiError::NotFound(format!(
            "No backup settings for tenant {}",
            tenant_id
        ))),
    }
}

async fn put_backup_settings(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(req): Json<UpdateSettingsRequest>,
) -> Result<Json<TenantBackupSettings>, ApiError> {
    let current = db::settings::get_settings(state.database.pool(), &tenant_id)
        .await?
        .unwrap_or_else(|| TenantBackupSettings::disabled(&tenant_id));

    let settings = TenantBackupSettings {
        tenant_id: tenant_id.clone(),
        is_enabled: req.is_enabled,
        include_extended_data: req
            .include_extended_data
            .unwrap_or(current.include_extended_data),
        retention_days: req.retention_days.unwrap_or(current.retention_days),
        max_backup_count: req.max_backup_count.unwrap_or(current.max_backup_count),
        auto_backup_enabled: req
            .auto_backup_enabled
            .unwrap_or(current.auto_backup_enabled),
        auto_backup_interval_hours: req
            .auto_backup_interval_hours
            .unwrap_or(current.auto_backup_interval_hours),
    };

    db::settings::upsert_settings(state.database.pool(), &settings).await?;
    Ok(Json(settings))
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database_ok = sqlx::query("SELECT 1")
        .fetch_one(state.database.pool())
        .await
        .is_ok();

    Json(HealthResponse {
        status: if database_ok { "healthy" } else { "degraded" },
        database: database_ok,
        scheduler_initialized: state.scheduler.is_initialized(),
        timestamp: Utc::now().timestamp(),
    })
}

fn ensure_scheduler_ready(state: &AppState) -> Result<(), ApiError> {
    if state.scheduler.is_initialized() {
        Ok(())
    } else {
        Err(ApiError::ServiceUnavailable(
            "Backup scheduler is not initialized".to_string(),
        ))
    }
}
