use chrono::{Duration, Utc};
use orchestrator_domain::{
    ExecutionHistory, ExecutionHistoryRepository, ExecutionStatus, LockRequirement, Schedule,
    ScheduleFilter, ScheduleRepository, ScheduleStatus,
};
use orchestrator_errors::OrchestratorError;
use orchestrator_infrastructure::{
    connect_sqlite, run_migrations, SqliteExecutionHistoryRepository, SqliteScheduleRepository,
};
use sqlx::SqlitePool;

async fn pool() -> SqlitePool {
    let pool = connect_sqlite("sqlite::memory:", 1, std::time::Duration::from_secs(5))
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

fn schedule(name: &str) -> Schedule {
    let mut schedule = Schedule::new(name, "acme", "csv", "0 0 2 * * *", true, "ops");
    schedule
        .resource_requirements
        .insert("cpu_slots".to_string(), 2);
    schedule
        .lock_requirements
        .push(LockRequirement::exclusive("table", "orders"));
    schedule.import_configuration = serde_json::json!({"source": "s3://bucket/orders.csv"});
    schedule
}

#[tokio::test]
async fn schedule_round_trips_through_sqlite() {
    let repo = SqliteScheduleRepository::new(pool().await);
    let mut original = schedule("nightly");
    original.next_execution = Some(Utc::now() + Duration::hours(1));
    repo.create(&original).await.unwrap();

    let loaded = repo.get_by_id(original.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "nightly");
    assert_eq!(loaded.status, ScheduleStatus::Scheduled);
    assert_eq!(loaded.resource_requirements.get("cpu_slots"), Some(&2));
    assert_eq!(loaded.lock_requirements, original.lock_requirements);
    assert_eq!(loaded.import_configuration["source"], "s3://bucket/orders.csv");
    assert_eq!(loaded.next_execution, original.next_execution);
    assert!(loaded.active_execution_id.is_none());
}

#[tokio::test]
async fn find_due_and_status_queries() {
    let repo = SqliteScheduleRepository::new(pool().await);
    let now = Utc::now();

    let mut due = schedule("due");
    due.next_execution = Some(now - Duration::minutes(1));
    let mut future = schedule("future");
    future.next_execution = Some(now + Duration::minutes(10));
    let mut paused = schedule("paused");
    paused.next_execution = Some(now - Duration::minutes(1));
    paused.status = ScheduleStatus::Paused;
    for s in [&due, &future, &paused] {
        repo.create(s).await.unwrap();
    }

    let found = repo.find_due(now).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, due.id);

    assert_eq!(repo.find_by_status(ScheduleStatus::Paused).await.unwrap().len(), 1);
    let active = repo
        .list(&ScheduleFilter {
            tenant_id: Some("acme".to_string()),
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn update_persists_counters_and_cursor() {
    let repo = SqliteScheduleRepository::new(pool().await);
    let mut s = schedule("retrying");
    repo.create(&s).await.unwrap();

    s.current_attempt = 2;
    s.active_execution_id = Some(uuid::Uuid::new_v4());
    s.status = ScheduleStatus::Executing;
    s.record_outcome(false, Utc::now());
    repo.update(&s).await.unwrap();

    let loaded = repo.get_by_id(s.id).await.unwrap().unwrap();
    assert_eq!(loaded.failure_count, 1);
    assert_eq!(loaded.execution_count, 1);
    assert_eq!(loaded.current_attempt, 0);
    assert_eq!(loaded.status, ScheduleStatus::Executing);

    let missing = schedule("missing");
    assert!(matches!(
        repo.update(&missing).await,
        Err(OrchestratorError::ScheduleNotFound { .. })
    ));
}

#[tokio::test]
async fn sealed_history_cannot_be_rewritten() {
    let pool = pool().await;
    let schedules = SqliteScheduleRepository::new(pool.clone());
    let histories = SqliteExecutionHistoryRepository::new(pool);
    let s = schedule("history");
    schedules.create(&s).await.unwrap();

    let now = Utc::now();
    let mut history = ExecutionHistory::new(s.id, now);
    histories.create(&history).await.unwrap();

    history.record_attempt(now, serde_json::json!({"blocked": "quota"}));
    history.mark_in_progress().unwrap();
    histories.update(&history).await.unwrap();

    history
        .seal(ExecutionStatus::Completed, now, 10, None)
        .unwrap();
    histories.update(&history).await.unwrap();

    let mut tampered = history.clone();
    tampered.records_processed = 99;
    assert!(matches!(
        histories.update(&tampered).await,
        Err(OrchestratorError::InvalidTransition { .. })
    ));

    let loaded = histories.get_by_id(history.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ExecutionStatus::Completed);
    assert_eq!(loaded.records_processed, 10);
    assert_eq!(loaded.attempts, 1);
    assert_eq!(histories.list_by_schedule(s.id).await.unwrap().len(), 1);
    assert_eq!(
        histories
            .list_by_status(ExecutionStatus::Completed)
            .await
            .unwrap()
            .len(),
        1
    );
}
