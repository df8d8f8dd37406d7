///! Backup job orchestrator
///!
///! Mediates between callers, the job store and the in-memory timer
///! registry. Every active job row owns exactly one live timer task and
///! vice versa; the registry is reconciled from the store on startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pensieve_common::{Error, Result, TriggerKind, SYSTEM_ACTOR};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::schedule::ScheduleCalculator;
use super::{derive_run_name, BackupJob, BackupService, NewBackupJob};
use crate::db::Database;

/// Composite key identifying a job's timer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub tenant_id: String,
    pub job_id: i64,
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.job_id)
    }
}

/// A live timer for one active job
struct JobTimer {
    handle: JoinHandle<()>,
    /// Updated by the timer task after every trigger
    next_run: Arc<RwLock<DateTime<Utc>>>,
}

/// In-memory map of live timers, keyed by `(tenant_id, job_id)`.
///
/// Mirrors the subset of job rows with `is_active = 1`. All mutations go
/// through the single lock so concurrent schedule/cancel calls cannot leave
/// two timers for one job.
pub struct TimerRegistry {
    timers: RwLock<HashMap<JobKey, JobTimer>>,
}

impl TimerRegistry {
    fn new() -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
        }
    }

    async fn insert(&self, key: JobKey, timer: JobTimer) {
        let mut timers = self.timers.write().await;
        if let Some(previous) = timers.insert(key, timer) {
            // One timer per job: a stale handle must not keep firing
            previous.handle.abort();
        }
    }

    async fn remove(&self, key: &JobKey) -> Option<JobTimer> {
        self.timers.write().await.remove(key)
    }

    async fn len(&self) -> usize {
        self.timers.read().await.len()
    }

    async fn snapshot(&self) -> Vec<JobTimerStatus> {
        let timers = self.timers.read().await;
        let mut entries = Vec::with_capacity(timers.len());
        for (key, timer) in timers.iter() {
            entries.push(JobTimerStatus {
                tenant_id: key.tenant_id.clone(),
                job_id: key.job_id,
                running: !timer.handle.is_finished(),
                next_run: *timer.next_run.read().await,
            });
        }
        entries.sort_by(|a, b| (&a.tenant_id, a.job_id).cmp(&(&b.tenant_id, b.job_id)));
        entries
    }

    async fn clear(&self) {
        let mut timers = self.timers.write().await;
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
    }
}

/// Per-timer entry in the status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTimerStatus {
    pub tenant_id: String,
    pub job_id: i64,
    pub running: bool,
    pub next_run: DateTime<Utc>,
}

/// Operational introspection for health checks and admin visibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub initialized: bool,
    pub active_job_count: usize,
    pub jobs: Vec<JobTimerStatus>,
}

/// The backup scheduler.
///
/// Constructed explicitly at startup and shared via `Arc`; there is no
/// global instance, so tests can run several schedulers side by side.
pub struct BackupScheduler {
    db: Arc<Database>,
    service: Arc<dyn BackupService>,
    calculator: Arc<dyn ScheduleCalculator>,
    registry: Arc<TimerRegistry>,
    initialized: AtomicBool,
}

impl BackupScheduler {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn BackupService>,
        calculator: Arc<dyn ScheduleCalculator>,
    ) -> Self {
        Self {
            db,
            service,
            calculator,
            registry: Arc::new(TimerRegistry::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Schedule a new recurring backup job for a tenant.
    ///
    /// Validates the expression and the tenant's backup settings before any
    /// state is touched; a rejected call has no side effects.
    pub async fn schedule_job(
        &self,
        tenant_id: &str,
        schedule_expression: &str,
        name_template: &str,
        requested_by: &str,
        include_extended_data: Option<bool>,
    ) -> Result<i64> {
        self.calculator.validate(schedule_expression)?;

        let settings = self.service.get_backup_settings(tenant_id).await?;
        let enabled = settings.as_ref().map(|s| s.is_enabled).unwrap_or(false);
        if !enabled {
            return Err(Error::PermissionDenied(format!(
                "Backups are disabled for tenant {}",
                tenant_id
            )));
        }

        let include_extended = include_extended_data
            .unwrap_or_else(|| settings.map(|s| s.include_extended_data).unwrap_or(false));

        let next_run = self.calculator.next_trigger(schedule_expression, Utc::now())?;

        let job_id = self
            .db
            .create_job(&NewBackupJob {
                tenant_id: tenant_id.to_string(),
                schedule_expression: schedule_expression.to_string(),
                name_template: name_template.to_string(),
                created_by: requested_by.to_string(),
                include_extended_data: include_extended,
                next_run,
            })
            .await?;

        let key = JobKey {
            tenant_id: tenant_id.to_string(),
            job_id,
        };
        self.spawn_timer(
            key.clone(),
            schedule_expression.to_string(),
            name_template.to_string(),
            next_run,
        )
        .await;

        info!(
            "Scheduled backup job {} ('{}', schedule: {}, next run: {})",
            key, name_template, schedule_expression, next_run
        );
        Ok(job_id)
    }

    /// Cancel a job. Returns false when no live timer exists for the key,
    /// making repeated cancellation an idempotent no-op.
    ///
    /// The timer handle is stopped before the persisted flip, so no new
    /// execution can start after this returns true.
    pub async fn cancel_job(&self, job_id: i64, tenant_id: &str) -> bool {
        let key = JobKey {
            tenant_id: tenant_id.to_string(),
            job_id,
        };

        let Some(timer) = self.registry.remove(&key).await else {
            return false;
        };
        timer.handle.abort();

        match self.db.deactivate_job(tenant_id, job_id).await {
            Ok(_) => info!("Cancelled backup job {}", key),
            Err(e) => {
                // Timer is stopped; the stale active row is caught by the
                // next recovery pass
                error!(
                    "Stopped timer for backup job {} but failed to persist deactivation: {}",
                    key, e
                );
            }
        }

        true
    }

    /// Active jobs for a tenant, ordered by next run time
    pub async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<BackupJob>> {
        self.db.list_active_jobs(tenant_id).await
    }

    pub async fn status(&self) -> SchedulerStatus {
        let jobs = self.registry.snapshot().await;
        SchedulerStatus {
            initialized: self.is_initialized(),
            active_job_count: jobs.len(),
            jobs,
        }
    }

    /// Startup recovery: rebuild the timer registry from persisted active
    /// job rows.
    ///
    /// Rows whose stored expression no longer parses are flipped inactive
    /// and logged rather than retried; after recovery the registry exactly
    /// mirrors the active rows.
    pub async fn recover(&self) -> Result<()> {
        let jobs = self.db.list_all_active_jobs().await?;
        let total = jobs.len();
        let mut restored = 0usize;

        for job in jobs {
            match self.calculator.next_trigger(&job.schedule_expression, Utc::now()) {
                Ok(next_run) => {
                    if let Err(e) = self.db.update_job_next_run(&job.tenant_id, job.id, next_run).await
                    {
                        warn!(
                            "Failed to persist recomputed next run for backup job {}/{}: {}",
                            job.tenant_id, job.id, e
                        );
                    }

                    let key = JobKey {
                        tenant_id: job.tenant_id.clone(),
                        job_id: job.id,
                    };
                    self.spawn_timer(key, job.schedule_expression, job.name_template, next_run)
                        .await;
                    restored += 1;
                }
                Err(e) => {
                    warn!(
                        "Deactivating backup job {}/{}: stored expression '{}' is unusable: {}",
                        job.tenant_id, job.id, job.schedule_expression, e
                    );
                    if let Err(e) = self.db.deactivate_job(&job.tenant_id, job.id).await {
                        error!(
                            "Failed to deactivate unrecoverable backup job {}/{}: {}",
                            job.tenant_id, job.id, e
                        );
                    }
                }
            }
        }

        if let Err(e) = self.ensure_auto_backup_jobs().await {
            warn!("Auto-backup reconciliation failed: {}", e);
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "Backup scheduler recovered {} of {} active jobs",
            restored, total
        );
        Ok(())
    }

    /// Stop all timers. Job rows keep `is_active = 1` so the next startup
    /// recovers them.
    pub async fn shutdown(&self) {
        self.registry.clear().await;
        self.initialized.store(false, Ordering::SeqCst);
        info!("Backup scheduler stopped");
    }

    /// Tenants with auto-backup enabled get a system-created job when they
    /// have no active job of their own.
    async fn ensure_auto_backup_jobs(&self) -> Result<()> {
        let tenants = crate::db::settings::list_auto_backup_tenants(self.db.pool()).await?;

        for settings in tenants {
            let has_job = crate::db::jobs::has_active_job(self.db.pool(), &settings.tenant_id).await?;
            if has_job {
                continue;
            }

            let expression = interval_expression(settings.auto_backup_interval_hours);
            if let Err(e) = self
                .schedule_job(&settings.tenant_id, &expression, "AutoBackup", SYSTEM_ACTOR, None)
                .await
            {
                warn!(
                    "Failed to create auto-backup job for tenant {}: {}",
                    settings.tenant_id, e
                );
            }
        }

        Ok(())
    }

    async fn spawn_timer(
        &self,
        key: JobKey,
        schedule_expression: String,
        name_template: String,
        next_run: DateTime<Utc>,
    ) {
        let next_run_cell = Arc::new(RwLock::new(next_run));

        let handle = tokio::spawn(run_job_timer(
            Arc::clone(&self.db),
            Arc::clone(&self.service),
            Arc::clone(&self.calculator),
            Arc::clone(&self.registry),
            key.clone(),
            schedule_expression,
            name_template,
            Arc::clone(&next_run_cell),
        ));

        self.registry
            .insert(
                key,
                JobTimer {
                    handle,
                    next_run: next_run_cell,
                },
            )
            .await;
    }
}

/// Map an auto-backup interval to a cron expression
fn interval_expression(interval_hours: u32) -> String {
    match interval_hours {
        0 => "0 2 * * *".to_string(),
        h if h < 24 => format!("0 */{} * * *", h),
        // Daily at 02:00 for day-or-longer intervals
        _ => "0 2 * * *".to_string(),
    }
}

/// The per-job timer loop: sleep until the next trigger, execute, record
/// the outcome, recompute, repeat.
///
/// Bookkeeping (`last_run`/`next_run`) is written after every execution
/// whether or not the backup succeeded, so a failing backup never stalls
/// the schedule or leaves a stale `next_run` behind. When the expression
/// runs out of future firings the job is retired rather than abandoned.
async fn run_job_timer(
    db: Arc<Database>,
    service: Arc<dyn BackupService>,
    calculator: Arc<dyn ScheduleCalculator>,
    registry: Arc<TimerRegistry>,
    key: JobKey,
    schedule_expression: String,
    name_template: String,
    next_run: Arc<RwLock<DateTime<Utc>>>,
) {
    loop {
        let target = *next_run.read().await;
        sleep_until(target).await;

        let fired_at = Utc::now();
        execute_trigger(service.as_ref(), &key, &name_template).await;

        let upcoming = match calculator.next_trigger(&schedule_expression, Utc::now()) {
            Ok(t) => t,
            Err(e) => {
                // Year-bounded expressions run dry; retire the row so no
                // active job is left without a live timer
                warn!(
                    "Backup job {}: expression '{}' has no further firings, deactivating: {}",
                    key, schedule_expression, e
                );
                if let Err(e) = db
                    .record_job_run(&key.tenant_id, key.job_id, fired_at, fired_at)
                    .await
                {
                    error!("Failed to record final run for backup job {}: {}", key, e);
                }
                if let Err(e) = db.deactivate_job(&key.tenant_id, key.job_id).await {
                    error!("Failed to deactivate exhausted backup job {}: {}", key, e);
                }
                // Dropping the removed entry detaches this task's own handle
                let _ = registry.remove(&key).await;
                break;
            }
        };
        *next_run.write().await = upcoming;

        if let Err(e) = db
            .record_job_run(&key.tenant_id, key.job_id, fired_at, upcoming)
            .await
        {
            // Best effort: the timer keeps running even when bookkeeping
            // could not be written
            error!("Failed to record run for backup job {}: {}", key, e);
        }
    }
}

async fn execute_trigger(service: &dyn BackupService, key: &JobKey, name_template: &str) {
    let name = derive_run_name(name_template, Utc::now());

    match service
        .create_server_backup(&key.tenant_id, &name, SYSTEM_ACTOR, TriggerKind::Scheduled)
        .await
    {
        Ok(outcome) if outcome.success => {
            info!(
                "Scheduled backup '{}' completed for job {} (backup: {})",
                name,
                key,
                outcome.backup_id.as_deref().unwrap_or("unknown")
            );
        }
        Ok(outcome) => {
            error!(
                "Scheduled backup '{}' failed for job {}: {}",
                name,
                key,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
        Err(e) => {
            error!("Scheduled backup '{}' errored for job {}: {}", name, key, e);
        }
    }
}

async fn sleep_until(target: DateTime<Utc>) {
    let now = Utc::now();
    if target > now {
        let delta = (target - now).to_std().unwrap_or_default();
        tokio::time::sleep(delta).await;
    }
}
