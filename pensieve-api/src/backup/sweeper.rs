///! Retention cleanup sweeper
///!
///! One long-lived task, independent of per-tenant job timers, that walks
///! every tenant with backups enabled and enforces retention. A single
///! tenant's failure never aborts the rest of the sweep.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::schedule::ScheduleCalculator;
use super::BackupService;
use crate::db::{self, Database};

pub struct CleanupSweeper {
    db: Arc<Database>,
    service: Arc<dyn BackupService>,
    calculator: Arc<dyn ScheduleCalculator>,
    /// Cron expression for the sweep, normally daily
    schedule: String,
}

impl CleanupSweeper {
    pub fn new(
        db: Arc<Database>,
        service: Arc<dyn BackupService>,
        calculator: Arc<dyn ScheduleCalculator>,
        schedule: String,
    ) -> Self {
        Self {
            db,
            service,
            calculator,
            schedule,
        }
    }

    /// Run the sweep loop until the shutdown signal fires
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Cleanup sweeper started (schedule: {})", self.schedule);

        loop {
            let next = match self.calculator.next_trigger(&self.schedule, Utc::now()) {
                Ok(t) => t,
                Err(e) => {
                    error!("Cleanup sweeper stopped: invalid schedule '{}': {}", self.schedule, e);
                    return;
                }
            };

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.sweep().await;
                }
                _ = shutdown.changed() => {
                    info!("Cleanup sweeper shutting down");
                    return;
                }
            }
        }
    }

    /// One pass over all tenants with backups enabled
    pub async fn sweep(&self) {
        let tenants = match db::settings::list_enabled_tenants(self.db.pool()).await {
            Ok(tenants) => tenants,
            Err(e) => {
                error!("Cleanup sweep aborted, could not list tenants: {}", e);
                return;
            }
        };

        let total = tenants.len();
        let mut failures = 0usize;

        for tenant_id in tenants {
            if let Err(e) = self.service.cleanup_old_backups(&tenant_id).await {
                warn!("Retention cleanup failed for tenant {}: {}", tenant_id, e);
                failures += 1;
            }
        }

        info!(
            "Cleanup sweep finished: {} tenants, {} failures",
            total, failures
        );
    }
}

/// Startup wiring helper; tests call `sweep` directly instead
pub fn spawn(
    sweeper: Arc<CleanupSweeper>,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(sweeper.run(shutdown))
}
