///! Local backup execution and retention enforcement
///!
///! Writes one export artifact per run under the configured data directory
///! and keeps the backup record table as its catalog. Retention removes
///! records past the tenant's age limit or count cap.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pensieve_common::{
    BackupOutcome, BackupRecord, BackupStatus, Result, TenantBackupSettings, TriggerKind,
};
use tracing::{info, warn};
use uuid::Uuid;

use super::BackupService;
use crate::db::{self, Database};

/// Upper bound on records examined per cleanup pass
const CLEANUP_SCAN_LIMIT: usize = 1000;

/// Backup service backed by the local filesystem and the backup catalog
pub struct LocalBackupService {
    db: Arc<Database>,
    data_dir: PathBuf,
}

impl LocalBackupService {
    pub fn new(db: Arc<Database>, data_dir: PathBuf) -> Self {
        Self { db, data_dir }
    }

    fn artifact_dir(&self, tenant_id: &str, name: &str) -> PathBuf {
        self.data_dir.join(tenant_id).join(name)
    }

    /// Write the export artifact for one run, returning its size in bytes
    async fn write_artifact(
        &self,
        tenant_id: &str,
        name: &str,
        actor_id: &str,
        trigger: TriggerKind,
    ) -> Result<u64> {
        let dir = self.artifact_dir(tenant_id, name);
        tokio::fs::create_dir_all(&dir).await?;

        let manifest = serde_json::json!({
            "tenant_id": tenant_id,
            "name": name,
            "created_by": actor_id,
            "trigger": trigger.as_str(),
            "created_at": Utc::now().to_rfc3339(),
        });
        let payload = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| pensieve_common::Error::System(format!("Manifest encoding failed: {}", e)))?;

        tokio::fs::write(dir.join("manifest.json"), &payload).await?;

        Ok(payload.len() as u64)
    }
}

#[async_trait]
impl BackupService for LocalBackupService {
    async fn get_backup_settings(&self, tenant_id: &str) -> Result<Option<TenantBackupSettings>> {
        db::settings::get_settings(self.db.pool(), tenant_id).await
    }

    async fn create_server_backup(
        &self,
        tenant_id: &str,
        name: &str,
        actor_id: &str,
        trigger: TriggerKind,
    ) -> Result<BackupOutcome> {
        let record = BackupRecord {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            status: BackupStatus::Pending,
            item_count: 0,
            size_bytes: 0,
            created_by: actor_id.to_string(),
            created_at: Utc::now(),
            completed_at: None,
            error_detail: None,
        };
        db::backups::insert_record(self.db.pool(), &record).await?;

        match self.write_artifact(tenant_id, name, actor_id, trigger).await {
            Ok(size_bytes) => {
                db::backups::mark_completed(self.db.pool(), &record.id, 1, size_bytes).await?;
                info!(
                    "Backup '{}' completed for tenant {} ({} bytes)",
                    name, tenant_id, size_bytes
                );
                Ok(BackupOutcome::completed(record.id))
            }
            Err(e) => {
                db::backups::mark_failed(self.db.pool(), &record.id, &e.to_string()).await?;
                warn!("Backup '{}' failed for tenant {}: {}", name, tenant_id, e);
                Ok(BackupOutcome::failed(e.to_string()))
            }
        }
    }

    async fn cleanup_old_backups(&self, tenant_id: &str) -> Result<()> {
        let settings = db::settings::get_settings(self.db.pool(), tenant_id)
            .await?
            .unwrap_or_else(|| TenantBackupSettings::disabled(tenant_id));

        // Newest first, so position doubles as the count-cap index
        let records =
            db::backups::list_for_tenant(self.db.pool(), tenant_id, CLEANUP_SCAN_LIMIT).await?;

        let cutoff = Utc::now() - Duration::days(settings.retention_days as i64);
        let mut removed = 0usize;

        for (position, record) in records.iter().enumerate() {
            let expired = record.created_at < cutoff;
            let over_cap = position >= settings.max_backup_count as usize;
            if !expired && !over_cap {
                continue;
            }

            // Artifact removal is best-effort; the catalog row is the
            // authoritative deletion
            let dir = self.artifact_dir(tenant_id, &record.name);
            if tokio::fs::remove_dir_all(&dir).await.is_err() {
                warn!(
                    "Backup artifact {} for tenant {} was already gone",
                    record.name, tenant_id
                );
            }
            db::backups::delete_record(self.db.pool(), &record.id).await?;
            removed += 1;
        }

        if removed > 0 {
            info!("Removed {} expired backups for tenant {}", removed, tenant_id);
        }

        Ok(())
    }

    async fn get_tenant_backups(&self, tenant_id: &str, limit: usize) -> Result<Vec<BackupRecord>> {
        db::backups::list_for_tenant(self.db.pool(), tenant_id, limit).await
    }
}
