///! Recurring backup job scheduling
///! Per-tenant cron-style jobs, durable job rows reconciled with in-memory
///! timers, restart recovery and retention cleanup

pub mod schedule;
pub mod scheduler;
pub mod service;
pub mod sweeper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pensieve_common::{BackupOutcome, BackupRecord, Result, TenantBackupSettings, TriggerKind};
use serde::{Deserialize, Serialize};

/// A persisted recurring backup job.
///
/// Jobs are never physically deleted; cancellation flips `is_active` so the
/// row remains as audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupJob {
    pub id: i64,
    pub tenant_id: String,
    /// Cron-style recurrence; validated before the row is ever written
    pub schedule_expression: String,
    /// Human label each run's artifact name is derived from
    pub name_template: String,
    pub created_by: String,
    pub include_extended_data: bool,
    pub is_active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to persist a new job
#[derive(Debug, Clone)]
pub struct NewBackupJob {
    pub tenant_id: String,
    pub schedule_expression: String,
    pub name_template: String,
    pub created_by: String,
    pub include_extended_data: bool,
    pub next_run: DateTime<Utc>,
}

/// Derive a unique run name from the job's template and the trigger instant
pub fn derive_run_name(name_template: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", name_template, at.format("%Y%m%d-%H%M%S"))
}

/// The backup execution collaborator.
///
/// The scheduler decides when and whether a backup runs; this trait owns
/// what a backup actually is. Implementations must be safe to call from
/// concurrently firing job timers.
#[async_trait]
pub trait BackupService: Send + Sync {
    /// Fetch a tenant's backup settings; `None` means backups were never enabled
    async fn get_backup_settings(&self, tenant_id: &str) -> Result<Option<TenantBackupSettings>>;

    /// Create a backup artifact for the tenant and record its metadata
    async fn create_server_backup(
        &self,
        tenant_id: &str,
        name: &str,
        actor_id: &str,
        trigger: TriggerKind,
    ) -> Result<BackupOutcome>;

    /// Enforce the tenant's retention policy (age and count limits)
    async fn cleanup_old_backups(&self, tenant_id: &str) -> Result<()>;

    /// List the tenant's most recent backup records
    async fn get_tenant_backups(&self, tenant_id: &str, limit: usize) -> Result<Vec<BackupRecord>>;
}
