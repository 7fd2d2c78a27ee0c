use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use import_orchestrator::{Application, ShutdownManager};
use orchestrator_application::ImportGateway;
use orchestrator_config::AppConfig;
use orchestrator_domain::{AuditEventType, ImportRequestStatus, ScheduleStatus};
use orchestrator_testing_utils::{ImportRequestBuilder, ScheduleBuilder, TestEnv};
use tempfile::TempDir;

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.dispatcher.tick_interval_seconds = 1;
    config.worker.concurrency = 2;
    config.worker.poll_interval_ms = 20;
    config.worker.lock_wait_seconds = 1;
    config.observability.audit_sink = "memory".to_string();
    config
}

async fn start(config: AppConfig) -> Result<(Arc<Application>, ShutdownManager, tokio::task::JoinHandle<()>)> {
    let app = Arc::new(Application::new(config).await?);
    let shutdown = ShutdownManager::new();
    let running = Arc::clone(&app);
    let token = shutdown.token();
    let handle = tokio::spawn(async move {
        running.run(token).await.unwrap();
    });
    Ok((app, shutdown, handle))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submitted_import_runs_to_completion() -> Result<()> {
    let (app, shutdown, handle) = start(fast_config()).await?;
    let orchestrator = app.orchestrator();

    let request = ImportRequestBuilder::new()
        .with_exclusive_lock("table", "customers")
        .with_configuration(serde_json::json!({ "records": 42, "duration_ms": 50 }))
        .build();
    let request_id = orchestrator.submit_import(request).await?;

    let completed = TestEnv::wait_for(
        || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .get_status(request_id)
                    .await
                    .map(|view| view.status == ImportRequestStatus::Completed)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(completed);

    let view = orchestrator.get_status(request_id).await?;
    assert_eq!(view.records_processed, 42);
    assert!(view.queue_position.is_none());
    assert!(app.services().locks.locks_held_by(request_id).is_empty());

    assert!(shutdown.shutdown_and_wait(handle, Duration::from_secs(5)).await);

    let audit = app.memory_audit().expect("memory audit sink configured");
    assert_eq!(audit.events_of_type(AuditEventType::RequestQueued).len(), 1);
    assert!(!audit.events_of_type(AuditEventType::LockAcquired).is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_import_is_reported_failed() -> Result<()> {
    let (app, shutdown, handle) = start(fast_config()).await?;
    let orchestrator = app.orchestrator();

    let request = ImportRequestBuilder::new()
        .with_configuration(serde_json::json!({ "fail": true, "duration_ms": 10 }))
        .build();
    let request_id = orchestrator.submit_import(request).await?;

    let failed = TestEnv::wait_for(
        || {
            let orchestrator = orchestrator.clone();
            async move {
                orchestrator
                    .get_status(request_id)
                    .await
                    .map(|view| view.status == ImportRequestStatus::Failed)
                    .unwrap_or(false)
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(failed);
    assert!(orchestrator.get_status(request_id).await?.error_message.is_some());

    assert!(shutdown.shutdown_and_wait(handle, Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_one_off_schedule_fires_and_completes() -> Result<()> {
    let (app, shutdown, handle) = start(fast_config()).await?;
    let orchestrator = app.orchestrator();

    let schedule = ScheduleBuilder::new()
        .once_at(Utc::now() + chrono::Duration::seconds(1))
        .build();
    let schedule_id = orchestrator.create_schedule(schedule).await?;

    let completed = TestEnv::wait_for(
        || {
            let orchestrator = orchestrator.clone();
            async move {
                matches!(
                    orchestrator.scheduler().get_schedule(schedule_id).await,
                    Ok(Some(schedule)) if schedule.status == ScheduleStatus::Completed
                )
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(completed);

    let schedule = orchestrator
        .scheduler()
        .get_schedule(schedule_id)
        .await?
        .expect("schedule exists");
    assert_eq!(schedule.success_count, 1);
    assert!(schedule.next_execution.is_none());
    assert_eq!(orchestrator.list_imports("acme").len(), 1);

    assert!(shutdown.shutdown_and_wait(handle, Duration::from_secs(5)).await);
    Ok(())
}

#[tokio::test]
async fn test_schedules_survive_restart_with_sqlite() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = fast_config();
    config.database.url = Some(format!(
        "sqlite://{}",
        dir.path().join("orchestrator.db").display()
    ));

    let schedule_id = {
        let app = Application::new(config.clone()).await?;
        app.orchestrator()
            .create_schedule(ScheduleBuilder::new().with_name("nightly").build())
            .await?
    };

    let app = Application::new(config).await?;
    let schedule = app
        .orchestrator()
        .scheduler()
        .get_schedule(schedule_id)
        .await?
        .expect("schedule persisted");
    assert_eq!(schedule.name, "nightly");
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert!(schedule.next_execution.is_some());
    Ok(())
}

#[tokio::test]
async fn test_application_from_config_file() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
[worker]
enabled = false

[[quota.default_limits]]
resource_type = "concurrent_imports"
limit = 1
unit = "imports"
enforcement_level = "HARD"

[observability]
audit_sink = "channel"
"#
    )?;

    let path = file.path().to_str().expect("utf-8 temp path").to_string();
    let config = AppConfig::load(Some(&path))?;
    let (app, shutdown, handle) = start(config).await?;
    let orchestrator = app.orchestrator();

    orchestrator.submit_import(ImportRequestBuilder::new().build()).await?;
    let err = orchestrator
        .submit_import(ImportRequestBuilder::new().build())
        .await
        .unwrap_err();
    assert_eq!(err.error_kind(), "quota_exceeded");

    // worker 关闭时请求一直排队
    tokio::time::sleep(Duration::from_millis(100)).await;
    let queued = orchestrator.list_imports("acme");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].status, ImportRequestStatus::Queued);
    assert_eq!(queued[0].queue_position, Some(1));

    assert!(shutdown.shutdown_and_wait(handle, Duration::from_secs(5)).await);
    assert!(app.memory_audit().is_none());
    Ok(())
}
