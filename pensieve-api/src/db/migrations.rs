///! Database migrations

use pensieve_common::{Error, Result};
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create migrations table
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            executed_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Persistence(format!("Failed to create migrations table: {}", e)))?;

    // Run migrations in order
    run_migration(pool, "001_create_backup_jobs_table", MIGRATION_001_CREATE_BACKUP_JOBS).await?;
    run_migration(pool, "002_create_backup_settings_table", MIGRATION_002_CREATE_BACKUP_SETTINGS)
        .await?;
    run_migration(pool, "003_create_backups_table", MIGRATION_003_CREATE_BACKUPS).await?;

    Ok(())
}

async fn run_migration(pool: &SqlitePool, name: &str, sql: &str) -> Result<()> {
    use sqlx::Row;

    // Check if migration already ran
    let row = sqlx::query("SELECT COUNT(*) as count FROM migrations WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Migration check failed: {}", e)))?;

    let count: i64 = row.get("count");
    if count > 0 {
        tracing::debug!("Migration {} already applied", name);
        return Ok(());
    }

    tracing::info!("Running migration: {}", name);

    // Run migration
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Migration {} failed: {}", name, e)))?;

    // Record migration
    sqlx::query("INSERT INTO migrations (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|e| Error::Persistence(format!("Failed to record migration: {}", e)))?;

    tracing::info!("Migration {} completed", name);

    Ok(())
}

const MIGRATION_001_CREATE_BACKUP_JOBS: &str = "
CREATE TABLE backup_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    schedule_expression TEXT NOT NULL,
    name_template TEXT NOT NULL,
    created_by TEXT NOT NULL,
    include_extended_data INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_run INTEGER,
    next_run INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX idx_backup_jobs_tenant_active ON backup_jobs(tenant_id, is_active);
CREATE INDEX idx_backup_jobs_active ON backup_jobs(is_active);
";

const MIGRATION_002_CREATE_BACKUP_SETTINGS: &str = "
CREATE TABLE backup_settings (
    tenant_id TEXT PRIMARY KEY,
    is_enabled INTEGER NOT NULL DEFAULT 0,
    include_extended_data INTEGER NOT NULL DEFAULT 0,
    retention_days INTEGER NOT NULL DEFAULT 30,
    max_backup_count INTEGER NOT NULL DEFAULT 10,
    auto_backup_enabled INTEGER NOT NULL DEFAULT 0,
    auto_backup_interval_hours INTEGER NOT NULL DEFAULT 24,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX idx_backup_settings_enabled ON backup_settings(is_enabled);
";

const MIGRATION_003_CREATE_BACKUPS: &str = "
CREATE TABLE backups (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    item_count INTEGER NOT NULL DEFAULT 0,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    completed_at INTEGER,
    error_detail TEXT
);

CREATE INDEX idx_backups_tenant_created ON backups(tenant_id, created_at);
";
