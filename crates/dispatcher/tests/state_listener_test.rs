use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_config::{AppConfig, DispatcherConfig};
use orchestrator_dispatcher::{
    AdmissionController, CoordinationServices, ImportScheduler, StateListener, TriggerOutcome,
};
use orchestrator_domain::{
    DependencyType, ExecutionStatus, ImportOutcome, ImportRequestStatus, ImportStatusUpdate,
    OrchestrationState, ScheduleStatus,
};
use orchestrator_infrastructure::{
    AuditTrail, InMemoryExecutionHistoryRepository, InMemoryScheduleRepository, MetricsCollector,
};
use orchestrator_testing_utils::{ImportRequestBuilder, ScheduleBuilder, TestEnv};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn setup() -> (Arc<ImportScheduler>, CoordinationServices) {
    let services = CoordinationServices::from_config(
        &AppConfig::default(),
        AuditTrail::tracing(),
        Arc::new(MetricsCollector::new()),
    )
    .unwrap();
    let scheduler = Arc::new(ImportScheduler::new(
        Arc::new(InMemoryScheduleRepository::new()),
        Arc::new(InMemoryExecutionHistoryRepository::new()),
        services.clone(),
        DispatcherConfig::default(),
    ));
    (scheduler, services)
}

fn finish(
    services: &CoordinationServices,
    request_id: Uuid,
    outcome: ImportOutcome,
) -> ImportStatusUpdate {
    let request = services.queue.dequeue_next("worker-1").unwrap().unwrap();
    assert_eq!(request.id, request_id);
    let finished = services.queue.report_outcome(request_id, &outcome).unwrap();
    ImportStatusUpdate {
        request_id,
        schedule_id: request.schedule_id,
        execution_id: request.execution_id,
        worker_id: "worker-1".to_string(),
        status: finished.status,
        outcome,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn test_adhoc_completion_unblocks_dependents() {
    let (scheduler, services) = setup();
    let listener = StateListener::new(scheduler, services.clone());
    let admission = AdmissionController::new(services.clone());

    let (load, transform) = (Uuid::new_v4(), Uuid::new_v4());
    services
        .dependency_graph
        .add_dependency(transform, load, DependencyType::Sequential)
        .unwrap();

    let request_id = admission
        .admit(ImportRequestBuilder::new().with_orchestration(load).build())
        .unwrap();
    assert!(!services.dependency_graph.is_satisfied(transform));

    let update = finish(&services, request_id, ImportOutcome::success(10));
    listener.process_update(&update).await.unwrap();

    assert_eq!(
        services.dependency_graph.state(load),
        Some(OrchestrationState::Succeeded)
    );
    assert!(services.dependency_graph.is_satisfied(transform));
}

#[tokio::test]
async fn test_failed_adhoc_request_releases_resource_dependents_only() {
    let (scheduler, services) = setup();
    let listener = StateListener::new(scheduler, services.clone());
    let admission = AdmissionController::new(services.clone());

    let (upstream, sequential, resource) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let graph = &services.dependency_graph;
    graph
        .add_dependency(sequential, upstream, DependencyType::Sequential)
        .unwrap();
    graph
        .add_dependency(resource, upstream, DependencyType::Resource)
        .unwrap();

    let request_id = admission
        .admit(ImportRequestBuilder::new().with_orchestration(upstream).build())
        .unwrap();
    let update = finish(&services, request_id, ImportOutcome::failure("schema mismatch"));
    assert_eq!(update.status, ImportRequestStatus::Failed);
    listener.process_update(&update).await.unwrap();

    assert_eq!(graph.state(upstream), Some(OrchestrationState::Failed));
    assert!(!graph.is_satisfied(sequential));
    assert!(graph.is_satisfied(resource));
}

#[tokio::test]
async fn test_non_terminal_updates_are_ignored() {
    let (scheduler, services) = setup();
    let listener = StateListener::new(scheduler, services.clone());
    let orchestration = Uuid::new_v4();
    let request_id = services
        .queue
        .enqueue(ImportRequestBuilder::new().with_orchestration(orchestration).build())
        .unwrap();

    let update = ImportStatusUpdate {
        request_id,
        schedule_id: None,
        execution_id: None,
        worker_id: "worker-1".to_string(),
        status: ImportRequestStatus::Processing,
        outcome: ImportOutcome::success(0),
        timestamp: Utc::now(),
    };
    listener.process_update(&update).await.unwrap();
    assert_eq!(services.dependency_graph.state(orchestration), None);
}

#[tokio::test]
async fn test_run_routes_scheduled_updates_and_drains_on_shutdown() {
    let (scheduler, services) = setup();
    let schedule = scheduler
        .create_schedule_at(ScheduleBuilder::new().build(), TestEnv::at(9, 30))
        .await
        .unwrap();
    let request_id = match scheduler
        .trigger_at(schedule.id, TestEnv::at(10, 0))
        .await
        .unwrap()
    {
        TriggerOutcome::Enqueued { request_id, .. } => request_id,
        other => panic!("expected Enqueued, got {other:?}"),
    };
    let update = finish(&services, request_id, ImportOutcome::success(42));

    let listener = StateListener::new(scheduler.clone(), services.clone());
    let (tx, rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    tx.send(update).await.unwrap();
    shutdown.cancel();

    // 已关闭的令牌下，通道里剩余的更新仍会被处理
    tokio::time::timeout(Duration::from_secs(5), listener.run(rx, shutdown))
        .await
        .unwrap();

    let schedule = scheduler.get_schedule(schedule.id).await.unwrap().unwrap();
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert_eq!(schedule.success_count, 1);
    let history = scheduler.execution_history(schedule.id).await.unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Completed);
    assert_eq!(history[0].records_processed, 42);
}
