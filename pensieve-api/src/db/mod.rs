///! Database layer using SQLite
///!
///! Persistent storage for backup jobs, per-tenant backup settings and
///! backup records. This is the single source of truth the in-memory
///! timer registry is reconciled against.

pub mod migrations;

use pensieve_common::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::backup::{BackupJob, NewBackupJob};
use chrono::{DateTime, Utc};

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        // Create parent directory if needed
        if let Some(path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    pensieve_common::Error::System(format!("Failed to create DB directory: {}", e))
                })?;
            }
        }

        // Create connection pool
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| {
                pensieve_common::Error::Persistence(format!("Database connection failed: {}", e))
            })?;

        tracing::info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // Backup job operations
    pub async fn create_job(&self, job: &NewBackupJob) -> Result<i64> {
        jobs::create_job(&self.pool, job).await
    }

    pub async fn get_job(&self, tenant_id: &str, job_id: i64) -> Result<Option<BackupJob>> {
        jobs::get_job(&self.pool, tenant_id, job_id).await
    }

    pub async fn list_active_jobs(&self, tenant_id: &str) -> Result<Vec<BackupJob>> {
        jobs::list_active_jobs(&self.pool, tenant_id).await
    }

    pub async fn list_all_active_jobs(&self) -> Result<Vec<BackupJob>> {
        jobs::list_all_active(&self.pool).await
    }

    pub async fn deactivate_job(&self, tenant_id: &str, job_id: i64) -> Result<bool> {
        jobs::deactivate_job(&self.pool, tenant_id, job_id).await
    }

    pub async fn record_job_run(
        &self,
        tenant_id: &str,
        job_id: i64,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        jobs::record_run(&self.pool, tenant_id, job_id, last_run, next_run).await
    }

    pub async fn update_job_next_run(
        &self,
        tenant_id: &str,
        job_id: i64,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        jobs::update_next_run(&self.pool, tenant_id, job_id, next_run).await
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database connection closed");
    }
}

/// Backup job database operations
pub mod jobs {
    use super::*;
    use pensieve_common::Error;
    use sqlx::Row;

    pub async fn create_job(pool: &SqlitePool, job: &NewBackupJob) -> Result<i64> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            "INSERT INTO backup_jobs (tenant_id, schedule_expression, name_template, created_by,
             include_extended_data, is_active, next_run, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)",
        )
        .bind(&job.tenant_id)
        .bind(&job.schedule_expression)
        .bind(&job.name_template)
        .bind(&job.created_by)
        .bind(job.include_extended_data)
        .bind(job.next_run.timestamp())
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to create backup job: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_job(
        pool: &SqlitePool,
        tenant_id: &str,
        job_id: i64,
    ) -> Result<Option<BackupJob>> {
        let row = sqlx::query("SELECT * FROM backup_jobs WHERE id = ? AND tenant_id = ?")
            .bind(job_id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to fetch backup job: {}", e)))?;

        row.map(|r| row_to_job(&r)).transpose()
    }

    pub async fn list_active_jobs(pool: &SqlitePool, tenant_id: &str) -> Result<Vec<BackupJob>> {
        let rows = sqlx::query(
            "SELECT * FROM backup_jobs WHERE tenant_id = ? AND is_active = 1
             ORDER BY next_run ASC",
        )
        .bind(tenant_id)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to list backup jobs: {}", e)))?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row_to_job(&row)?);
        }

        Ok(jobs)
    }

    pub async fn list_all_active(pool: &SqlitePool) -> Result<Vec<BackupJob>> {
        let rows = sqlx::query(
            "SELECT * FROM backup_jobs WHERE is_active = 1 ORDER BY tenant_id, id",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to list active backup jobs: {}", e)))?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row_to_job(&row)?);
        }

        Ok(jobs)
    }

    pub async fn has_active_job(pool: &SqlitePool, tenant_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM backup_jobs WHERE tenant_id = ? AND is_active = 1",
        )
        .bind(tenant_id)
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to count backup jobs: {}", e)))?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Soft-delete: the row stays for audit history, only the flag flips
    pub async fn deactivate_job(pool: &SqlitePool, tenant_id: &str, job_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE backup_jobs SET is_active = 0, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND is_active = 1",
        )
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .bind(tenant_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to deactivate backup job: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn record_run(
        pool: &SqlitePool,
        tenant_id: &str,
        job_id: i64,
        last_run: DateTime<Utc>,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE backup_jobs SET last_run = ?, next_run = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(last_run.timestamp())
        .bind(next_run.timestamp())
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .bind(tenant_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to record job run: {}", e)))?;

        Ok(())
    }

    pub async fn update_next_run(
        pool: &SqlitePool,
        tenant_id: &str,
        job_id: i64,
        next_run: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE backup_jobs SET next_run = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(next_run.timestamp())
        .bind(Utc::now().timestamp())
        .bind(job_id)
        .bind(tenant_id)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to update next run: {}", e)))?;

        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> Result<BackupJob> {
        let next_run_ts: i64 = row.get("next_run");
        let next_run = DateTime::from_timestamp(next_run_ts, 0)
            .ok_or_else(|| Error::Persistence("Invalid next_run timestamp".to_string()))?;

        let last_run = row
            .get::<Option<i64>, _>("last_run")
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let created_at = DateTime::from_timestamp(row.get::<i64, _>("created_at"), 0)
            .ok_or_else(|| Error::Persistence("Invalid created_at timestamp".to_string()))?;
        let updated_at = DateTime::from_timestamp(row.get::<i64, _>("updated_at"), 0)
            .ok_or_else(|| Error::Persistence("Invalid updated_at timestamp".to_string()))?;

        Ok(BackupJob {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            schedule_expression: row.get("schedule_expression"),
            name_template: row.get("name_template"),
            created_by: row.get("created_by"),
            include_extended_data: row.get("include_extended_data"),
            is_active: row.get("is_active"),
            last_run,
            next_run,
            created_at,
            updated_at,
        })
    }
}

/// Tenant backup settings database operations
pub mod settings {
    use super::*;
    use pensieve_common::{Error, TenantBackupSettings};
    use sqlx::Row;

    pub async fn get_settings(
        pool: &SqlitePool,
        tenant_id: &str,
    ) -> Result<Option<TenantBackupSettings>> {
        let row = sqlx::query("SELECT * FROM backup_settings WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to fetch backup settings: {}", e)))?;

        Ok(row.map(|r| row_to_settings(&r)))
    }

    pub async fn upsert_settings(pool: &SqlitePool, settings: &TenantBackupSettings) -> Result<()> {
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO backup_settings (tenant_id, is_enabled, include_extended_data,
             retention_days, max_backup_count, auto_backup_enabled, auto_backup_interval_hours,
             created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 is_enabled = excluded.is_enabled,
                 include_extended_data = excluded.include_extended_data,
                 retention_days = excluded.retention_days,
                 max_backup_count = excluded.max_backup_count,
                 auto_backup_enabled = excluded.auto_backup_enabled,
                 auto_backup_interval_hours = excluded.auto_backup_interval_hours,
                 updated_at = excluded.updated_at",
        )
        .bind(&settings.tenant_id)
        .bind(settings.is_enabled)
        .bind(settings.include_extended_data)
        .bind(settings.retention_days as i64)
        .bind(settings.max_backup_count as i64)
        .bind(settings.auto_backup_enabled)
        .bind(settings.auto_backup_interval_hours as i64)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to upsert backup settings: {}", e)))?;

        Ok(())
    }

    pub async fn list_enabled_tenants(pool: &SqlitePool) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT tenant_id FROM backup_settings WHERE is_enabled = 1 ORDER BY tenant_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to list enabled tenants: {}", e)))?;

        Ok(rows.iter().map(|r| r.get("tenant_id")).collect())
    }

    pub async fn list_auto_backup_tenants(pool: &SqlitePool) -> Result<Vec<TenantBackupSettings>> {
        let rows = sqlx::query(
            "SELECT * FROM backup_settings
             WHERE is_enabled = 1 AND auto_backup_enabled = 1 ORDER BY tenant_id",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to list auto-backup tenants: {}", e)))?;

        Ok(rows.iter().map(row_to_settings).collect())
    }

    fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> TenantBackupSettings {
        TenantBackupSettings {
            tenant_id: row.get("tenant_id"),
            is_enabled: row.get("is_enabled"),
            include_extended_data: row.get("include_extended_data"),
            retention_days: row.get::<i64, _>("retention_days") as u32,
            max_backup_count: row.get::<i64, _>("max_backup_count") as u32,
            auto_backup_enabled: row.get("auto_backup_enabled"),
            auto_backup_interval_hours: row.get::<i64, _>("auto_backup_interval_hours") as u32,
        }
    }
}

/// Backup record database operations
pub mod backups {
    use super::*;
    use pensieve_common::{BackupRecord, BackupStatus, Error};
    use sqlx::Row;

    pub async fn insert_record(pool: &SqlitePool, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (id, tenant_id, name, status, item_count, size_bytes,
             created_by, created_at, completed_at, error_detail)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.name)
        .bind(record.status.to_string())
        .bind(record.item_count as i64)
        .bind(record.size_bytes as i64)
        .bind(&record.created_by)
        .bind(record.created_at.timestamp())
        .bind(record.completed_at.map(|t| t.timestamp()))
        .bind(&record.error_detail)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to insert backup record: {}", e)))?;

        Ok(())
    }

    pub async fn mark_completed(
        pool: &SqlitePool,
        id: &str,
        item_count: u64,
        size_bytes: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE backups SET status = 'completed', item_count = ?, size_bytes = ?,
             completed_at = ? WHERE id = ?",
        )
        .bind(item_count as i64)
        .bind(size_bytes as i64)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to complete backup record: {}", e)))?;

        Ok(())
    }

    pub async fn mark_failed(pool: &SqlitePool, id: &str, error_detail: &str) -> Result<()> {
        sqlx::query(
            "UPDATE backups SET status = 'failed', error_detail = ?, completed_at = ?
             WHERE id = ?",
        )
        .bind(error_detail)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to fail backup record: {}", e)))?;

        Ok(())
    }

    pub async fn list_for_tenant(
        pool: &SqlitePool,
        tenant_id: &str,
        limit: usize,
    ) -> Result<Vec<BackupRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM backups WHERE tenant_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to list backups: {}", e)))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row_to_record(&row)?);
        }

        Ok(records)
    }

    pub async fn delete_record(pool: &SqlitePool, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM backups WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to delete backup record: {}", e)))?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<BackupRecord> {
        let status_str: String = row.get("status");
        let status: BackupStatus = status_str.parse()?;

        let created_at = DateTime::from_timestamp(row.get::<i64, _>("created_at"), 0)
            .ok_or_else(|| Error::Persistence("Invalid created_at timestamp".to_string()))?;
        let completed_at = row
            .get::<Option<i64>, _>("completed_at")
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        Ok(BackupRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            name: row.get("name"),
            status,
            item_count: row.get::<i64, _>("item_count") as u64,
            size_bytes: row.get::<i64, _>("size_bytes") as u64,
            created_by: row.get("created_by"),
            created_at,
            completed_at,
            error_detail: row.get("error_detail"),
        })
    }
}
