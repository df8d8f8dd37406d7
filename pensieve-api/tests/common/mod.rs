#![allow(dead_code)]

// Shared test harness: a throwaway SQLite database plus a scripted
// backup service that records every call it receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pensieve_api::backup::BackupService;
use pensieve_api::db::Database;
use pensieve_common::{
    BackupOutcome, BackupRecord, Error, Result, TenantBackupSettings, TriggerKind,
};
use tempfile::TempDir;

/// A migrated database backed by a temp directory; the directory must stay
/// alive for the duration of the test.
pub struct TestDb {
    pub db: Arc<Database>,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

    let db = Database::new(&url, 1).await.expect("failed to open test db");
    db.migrate().await.expect("migrations failed");

    TestDb {
        db: Arc::new(db),
        _dir: dir,
    }
}

/// Enabled settings with the stock defaults
pub fn enabled_settings(tenant_id: &str) -> TenantBackupSettings {
    TenantBackupSettings {
        tenant_id: tenant_id.to_string(),
        is_enabled: true,
        include_extended_data: false,
        retention_days: 30,
        max_backup_count: 10,
        auto_backup_enabled: false,
        auto_backup_interval_hours: 24,
    }
}

#[derive(Debug, Clone)]
pub struct ExecutedBackup {
    pub tenant_id: String,
    pub name: String,
    pub actor_id: String,
    pub trigger: TriggerKind,
}

/// Scripted backup service. Settings come from an in-memory map, backup
/// runs and cleanup passes are recorded, and failures can be injected per
/// concern.
pub struct MockBackupService {
    settings: Mutex<HashMap<String, TenantBackupSettings>>,
    executed: Mutex<Vec<ExecutedBackup>>,
    cleaned: Mutex<Vec<String>>,
    fail_backups: AtomicBool,
    fail_cleanup_for: Mutex<Vec<String>>,
}

impl MockBackupService {
    pub fn new() -> Self {
        Self {
            settings: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
            cleaned: Mutex::new(Vec::new()),
            fail_backups: AtomicBool::new(false),
            fail_cleanup_for: Mutex::new(Vec::new()),
        }
    }

    pub fn with_enabled_tenant(tenant_id: &str) -> Arc<Self> {
        let service = Self::new();
        service.set_settings(enabled_settings(tenant_id));
        Arc::new(service)
    }

    pub fn set_settings(&self, settings: TenantBackupSettings) {
        self.settings
            .lock()
            .unwrap()
            .insert(settings.tenant_id.clone(), settings);
    }

    pub fn set_fail_backups(&self, fail: bool) {
        self.fail_backups.store(fail, Ordering::SeqCst);
    }

    pub fn fail_cleanup_for(&self, tenant_id: &str) {
        self.fail_cleanup_for
            .lock()
            .unwrap()
            .push(tenant_id.to_string());
    }

    pub fn executed(&self) -> Vec<ExecutedBackup> {
        self.executed.lock().unwrap().clone()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackupService for MockBackupService {
    async fn get_backup_settings(&self, tenant_id: &str) -> Result<Option<TenantBackupSettings>> {
        Ok(self.settings.lock().unwrap().get(tenant_id).cloned())
    }

    async fn create_server_backup(
        &self,
        tenant_id: &str,
        name: &str,
        actor_id: &str,
        trigger: TriggerKind,
    ) -> Result<BackupOutcome> {
        self.executed.lock().unwrap().push(ExecutedBackup {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            actor_id: actor_id.to_string(),
            trigger,
        });

        if self.fail_backups.load(Ordering::SeqCst) {
            Ok(BackupOutcome::failed("injected backup failure"))
        } else {
            Ok(BackupOutcome::completed(format!("backup-{}", name)))
        }
    }

    async fn cleanup_old_backups(&self, tenant_id: &str) -> Result<()> {
        if self
            .fail_cleanup_for
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == tenant_id)
        {
            return Err(Error::Execution(format!(
                "injected cleanup failure for {}",
                tenant_id
            )));
        }

        self.cleaned.lock().unwrap().push(tenant_id.to_string());
        Ok(())
    }

    async fn get_tenant_backups(&self, _tenant_id: &str, _limit: usize) -> Result<Vec<BackupRecord>> {
        Ok(Vec::new())
    }
}
