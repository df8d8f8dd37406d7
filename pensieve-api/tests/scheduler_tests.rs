///! Scheduler integration tests: persistence, timer lifecycle, recovery.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Timelike, Utc};
use pensieve_api::backup::schedule::{CronCalculator, ScheduleCalculator};
use pensieve_api::backup::scheduler::BackupScheduler;
use pensieve_api::backup::{BackupService, NewBackupJob};
use pensieve_api::db::{self, Database};
use pensieve_common::{Error, TriggerKind, SYSTEM_ACTOR};

use common::{enabled_settings, test_db, MockBackupService};

fn make_scheduler(db: Arc<Database>, service: Arc<MockBackupService>) -> Arc<BackupScheduler> {
    Arc::new(BackupScheduler::new(
        db,
        service as Arc<dyn BackupService>,
        Arc::new(CronCalculator::new()),
    ))
}

#[tokio::test]
async fn test_schedule_job_persists_and_arms_timer() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);

    let before = Utc::now();
    let job_id = scheduler
        .schedule_job("tenant-a", "0 2 * * *", "Nightly", "operator", None)
        .await
        .expect("scheduling should succeed");
    assert!(job_id > 0);

    let job = harness
        .db
        .get_job("tenant-a", job_id)
        .await
        .unwrap()
        .expect("job row must exist");
    assert!(job.is_active);
    assert_eq!(job.schedule_expression, "0 2 * * *");
    assert_eq!(job.name_template, "Nightly");
    assert!(job.next_run > before);
    assert!(job.last_run.is_none());

    let status = scheduler.status().await;
    assert_eq!(status.active_job_count, 1);
    assert_eq!(status.jobs[0].job_id, job_id);
    assert!(status.jobs[0].running);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_invalid_expression_is_rejected_without_side_effects() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);

    let err = scheduler
        .schedule_job("tenant-a", "not-a-cron", "Nightly", "operator", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert!(scheduler.list_jobs("tenant-a").await.unwrap().is_empty());
    assert_eq!(scheduler.status().await.active_job_count, 0);
}

#[tokio::test]
async fn test_disabled_tenant_cannot_schedule() {
    let harness = test_db().await;
    // No settings row at all for this tenant
    let service = Arc::new(MockBackupService::new());
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);

    let err = scheduler
        .schedule_job("tenant-b", "0 2 * * *", "Nightly", "operator", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(_)));
    assert!(scheduler.list_jobs("tenant-b").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_stops_execution_and_is_idempotent() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), Arc::clone(&service));

    // Every second, so the timer demonstrably fires before cancellation
    let job_id = scheduler
        .schedule_job("tenant-a", "* * * * * *", "Rapid", "operator", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let fired_before_cancel = service.executed_count();
    assert!(fired_before_cancel >= 1, "timer never fired");

    assert!(scheduler.cancel_job(job_id, "tenant-a").await);

    // No execution may start once the handle is gone
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(service.executed_count(), fired_before_cancel);

    // Second cancel is a no-op
    assert!(!scheduler.cancel_job(job_id, "tenant-a").await);

    let job = harness.db.get_job("tenant-a", job_id).await.unwrap().unwrap();
    assert!(!job.is_active);
    assert_eq!(scheduler.status().await.active_job_count, 0);
}

#[tokio::test]
async fn test_scheduled_run_records_system_actor() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), Arc::clone(&service));

    let job_id = scheduler
        .schedule_job("tenant-a", "* * * * * *", "Rapid", "operator", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    scheduler.cancel_job(job_id, "tenant-a").await;

    let runs = service.executed();
    assert!(!runs.is_empty());
    for run in &runs {
        assert_eq!(run.tenant_id, "tenant-a");
        assert_eq!(run.actor_id, SYSTEM_ACTOR);
        assert_eq!(run.trigger, TriggerKind::Scheduled);
        assert!(run.name.starts_with("Rapid-"));
    }
}

#[tokio::test]
async fn test_list_jobs_orders_by_next_run() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);

    let two_am = scheduler
        .schedule_job("tenant-a", "0 2 * * *", "TwoAm", "operator", None)
        .await
        .unwrap();
    let three_am = scheduler
        .schedule_job("tenant-a", "0 3 * * *", "ThreeAm", "operator", None)
        .await
        .unwrap();

    let jobs = scheduler.list_jobs("tenant-a").await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].next_run < jobs[1].next_run);

    // Whichever slot comes up sooner is listed first, regardless of
    // creation order
    let calculator = CronCalculator::new();
    let now = Utc::now();
    let expected_first = if calculator.next_trigger("0 2 * * *", now).unwrap()
        < calculator.next_trigger("0 3 * * *", now).unwrap()
    {
        two_am
    } else {
        three_am
    };
    assert_eq!(jobs[0].id, expected_first);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_expression_retires_job() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    let scheduler = make_scheduler(Arc::clone(&harness.db), Arc::clone(&service));

    // Year-qualified expression that fires exactly once, a few seconds out
    let at = Utc::now() + chrono::Duration::seconds(3);
    let expression = format!(
        "{} {} {} {} {} * {}",
        at.second(),
        at.minute(),
        at.hour(),
        at.day(),
        at.month(),
        at.year()
    );

    let job_id = scheduler
        .schedule_job("tenant-a", &expression, "OneShot", "operator", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(6000)).await;
    assert_eq!(service.executed_count(), 1);

    // The final run is recorded and the row retired, so no active row is
    // left behind without a live timer
    let job = harness.db.get_job("tenant-a", job_id).await.unwrap().unwrap();
    assert!(!job.is_active);
    assert!(job.last_run.is_some());
    assert_eq!(scheduler.status().await.active_job_count, 0);
}

#[tokio::test]
async fn test_failed_backup_still_advances_schedule() {
    let harness = test_db().await;
    let service = MockBackupService::with_enabled_tenant("tenant-a");
    service.set_fail_backups(true);
    let scheduler = make_scheduler(Arc::clone(&harness.db), Arc::clone(&service));

    let job_id = scheduler
        .schedule_job("tenant-a", "* * * * * *", "Rapid", "operator", None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(service.executed_count() >= 1);
    scheduler.cancel_job(job_id, "tenant-a").await;

    // Bookkeeping was written despite every run failing
    let job = harness.db.get_job("tenant-a", job_id).await.unwrap().unwrap();
    let last_run = job.last_run.expect("last_run must be set after a failed run");
    assert!(job.next_run > last_run);
}

#[tokio::test]
async fn test_recover_restores_active_jobs_with_fresh_next_run() {
    let harness = test_db().await;
    let stale = Utc::now() - chrono::Duration::days(3);

    // Two rows left behind by a previous process, both with stale next_run
    for tenant in ["tenant-a", "tenant-b"] {
        harness
            .db
            .create_job(&NewBackupJob {
                tenant_id: tenant.to_string(),
                schedule_expression: "0 2 * * *".to_string(),
                name_template: "Nightly".to_string(),
                created_by: "operator".to_string(),
                include_extended_data: false,
                next_run: stale,
            })
            .await
            .unwrap();
    }

    let service = Arc::new(MockBackupService::new());
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);
    assert!(!scheduler.is_initialized());

    scheduler.recover().await.unwrap();
    assert!(scheduler.is_initialized());

    let status = scheduler.status().await;
    assert_eq!(status.active_job_count, 2);

    // next_run was recomputed from now, not replayed from the stale row
    let calculator = CronCalculator::new();
    let now = Utc::now();
    for job in scheduler.list_jobs("tenant-a").await.unwrap() {
        assert!(job.next_run > now - chrono::Duration::seconds(5));
        let expected = calculator.next_trigger("0 2 * * *", now).unwrap();
        assert!((job.next_run - expected).num_seconds().abs() <= 60);
    }

    scheduler.shutdown().await;
    assert!(!scheduler.is_initialized());
    assert_eq!(scheduler.status().await.active_job_count, 0);

    // Shutdown keeps rows active so the next startup recovers them again
    let jobs = harness.db.list_all_active_jobs().await.unwrap();
    assert_eq!(jobs.len(), 2);
}

#[tokio::test]
async fn test_recover_deactivates_unusable_rows() {
    let harness = test_db().await;

    let good_id = harness
        .db
        .create_job(&NewBackupJob {
            tenant_id: "tenant-a".to_string(),
            schedule_expression: "0 2 * * *".to_string(),
            name_template: "Nightly".to_string(),
            created_by: "operator".to_string(),
            include_extended_data: false,
            next_run: Utc::now(),
        })
        .await
        .unwrap();

    // A row whose stored expression no longer parses
    let corrupt_id = harness
        .db
        .create_job(&NewBackupJob {
            tenant_id: "tenant-a".to_string(),
            schedule_expression: "garbage expression".to_string(),
            name_template: "Broken".to_string(),
            created_by: "operator".to_string(),
            include_extended_data: false,
            next_run: Utc::now(),
        })
        .await
        .unwrap();

    let service = Arc::new(MockBackupService::new());
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);
    scheduler.recover().await.unwrap();

    let status = scheduler.status().await;
    assert_eq!(status.active_job_count, 1);
    assert_eq!(status.jobs[0].job_id, good_id);

    let corrupt = harness.db.get_job("tenant-a", corrupt_id).await.unwrap().unwrap();
    assert!(!corrupt.is_active);

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_recover_creates_auto_backup_jobs() {
    let harness = test_db().await;

    let mut settings = enabled_settings("tenant-auto");
    settings.auto_backup_enabled = true;
    settings.auto_backup_interval_hours = 6;
    db::settings::upsert_settings(harness.db.pool(), &settings)
        .await
        .unwrap();

    // The service must agree the tenant is enabled for scheduling to pass
    let service = MockBackupService::with_enabled_tenant("tenant-auto");
    let scheduler = make_scheduler(Arc::clone(&harness.db), service);
    scheduler.recover().await.unwrap();

    let jobs = scheduler.list_jobs("tenant-auto").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].schedule_expression, "0 */6 * * *");
    assert_eq!(jobs[0].name_template, "AutoBackup");
    assert_eq!(jobs[0].created_by, SYSTEM_ACTOR);

    // A second recovery pass does not duplicate the job
    scheduler.shutdown().await;
    scheduler.recover().await.unwrap();
    assert_eq!(scheduler.list_jobs("tenant-auto").await.unwrap().len(), 1);

    scheduler.shutdown().await;
}
