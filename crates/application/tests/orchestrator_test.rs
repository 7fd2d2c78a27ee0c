use std::sync::Arc;

use orchestrator_application::{ImportGateway, ImportOrchestrator};
use orchestrator_config::{AppConfig, DispatcherConfig};
use orchestrator_dispatcher::{CoordinationServices, ImportScheduler, TriggerOutcome};
use orchestrator_domain::{
    resource_types, AuditEventType, DependencyType, EnforcementLevel, ExecutionStatus,
    ImportRequestStatus, OrchestrationState, ScheduleStatus, TenantLimit,
};
use orchestrator_errors::OrchestratorError;
use orchestrator_infrastructure::{
    AuditTrail, InMemoryAuditSink, InMemoryExecutionHistoryRepository, InMemoryScheduleRepository,
    MetricsCollector,
};
use orchestrator_testing_utils::{ImportRequestBuilder, ScheduleBuilder, TestEnv};
use uuid::Uuid;

fn orchestrator() -> (ImportOrchestrator, Arc<InMemoryAuditSink>) {
    let audit = Arc::new(InMemoryAuditSink::new());
    let services = CoordinationServices::from_config(
        &AppConfig::default(),
        AuditTrail::new(audit.clone()),
        Arc::new(MetricsCollector::new()),
    )
    .unwrap();
    let scheduler = Arc::new(ImportScheduler::new(
        Arc::new(InMemoryScheduleRepository::new()),
        Arc::new(InMemoryExecutionHistoryRepository::new()),
        services.clone(),
        DispatcherConfig::default(),
    ));
    (ImportOrchestrator::new(scheduler, services), audit)
}

#[tokio::test]
async fn test_third_concurrent_import_is_denied() {
    let (gateway, audit) = orchestrator();
    gateway
        .set_tenant_limit(TenantLimit::new(
            "acme",
            resource_types::CONCURRENT_IMPORTS,
            2,
            "imports",
            EnforcementLevel::Hard,
        ))
        .await
        .unwrap();

    let first = gateway
        .submit_import(ImportRequestBuilder::new().build())
        .await
        .unwrap();
    gateway
        .submit_import(ImportRequestBuilder::new().build())
        .await
        .unwrap();

    let err = gateway
        .submit_import(ImportRequestBuilder::new().build())
        .await
        .unwrap_err();
    match err {
        OrchestratorError::QuotaExceeded {
            tenant_id,
            resource_type,
            consumed,
            limit,
            ..
        } => {
            assert_eq!(tenant_id, "acme");
            assert_eq!(resource_type, resource_types::CONCURRENT_IMPORTS);
            assert_eq!(consumed, 2);
            assert_eq!(limit, 2);
        }
        other => panic!("expected QuotaExceeded, got {other:?}"),
    }
    assert_eq!(gateway.list_imports("acme").len(), 2);
    assert_eq!(audit.events_of_type(AuditEventType::QuotaDenied).len(), 1);

    // 其他租户不受影响
    gateway
        .submit_import(ImportRequestBuilder::new().with_tenant("globex").build())
        .await
        .unwrap();

    // 取消一个之后名额被释放
    let cancelled = gateway.cancel_import(first).await.unwrap();
    assert_eq!(cancelled.status, ImportRequestStatus::Cancelled);
    gateway
        .submit_import(ImportRequestBuilder::new().build())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_status_reports_queue_position() {
    let (gateway, _) = orchestrator();
    gateway
        .set_tenant_limit(TenantLimit::new(
            "acme",
            resource_types::CONCURRENT_IMPORTS,
            10,
            "imports",
            EnforcementLevel::Hard,
        ))
        .await
        .unwrap();

    let low = gateway
        .submit_import(ImportRequestBuilder::new().with_priority(50).build())
        .await
        .unwrap();
    let high = gateway
        .submit_import(ImportRequestBuilder::new().with_priority(1).build())
        .await
        .unwrap();

    assert_eq!(gateway.get_status(high).await.unwrap().queue_position, Some(1));
    let status = gateway.get_status(low).await.unwrap();
    assert_eq!(status.status, ImportRequestStatus::Queued);
    assert_eq!(status.queue_position, Some(2));

    let dequeued = gateway
        .services()
        .queue
        .dequeue_next("worker-1")
        .unwrap()
        .unwrap();
    assert_eq!(dequeued.id, high);
    let status = gateway.get_status(high).await.unwrap();
    assert_eq!(status.status, ImportRequestStatus::Processing);
    assert_eq!(status.queue_position, None);
    assert_eq!(status.assigned_worker.as_deref(), Some("worker-1"));
    assert_eq!(gateway.get_status(low).await.unwrap().queue_position, Some(1));

    let err = gateway.get_status(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RequestNotFound { .. }));
}

#[tokio::test]
async fn test_invalid_request_is_rejected_before_queueing() {
    let (gateway, _) = orchestrator();
    let err = gateway
        .submit_import(ImportRequestBuilder::new().with_priority(0).build())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));
    assert!(gateway.list_imports("acme").is_empty());
}

#[tokio::test]
async fn test_dependencies_gate_submission_and_reject_cycles() {
    let (gateway, _) = orchestrator();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    gateway
        .add_orchestration_dependency(a, b, DependencyType::Sequential)
        .await
        .unwrap();

    let err = gateway
        .add_orchestration_dependency(b, a, DependencyType::Data)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::CycleError { .. }));
    assert!(gateway.services().dependency_graph.is_acyclic());

    let err = gateway
        .submit_import(ImportRequestBuilder::new().with_orchestration(a).build())
        .await
        .unwrap_err();
    match err {
        OrchestratorError::DependencyNotSatisfied { blocking, .. } => assert_eq!(blocking, vec![b]),
        other => panic!("expected DependencyNotSatisfied, got {other:?}"),
    }

    let upstream = gateway
        .submit_import(ImportRequestBuilder::new().with_orchestration(b).build())
        .await
        .unwrap();
    assert_eq!(
        gateway.services().dependency_graph.state(b),
        Some(OrchestrationState::Running)
    );

    // 取消上游后顺序依赖仍不满足
    gateway.cancel_import(upstream).await.unwrap();
    assert_eq!(
        gateway.services().dependency_graph.state(b),
        Some(OrchestrationState::Cancelled)
    );
    assert!(!gateway.services().dependency_graph.is_satisfied(a));
}

#[tokio::test]
async fn test_schedule_lifecycle_through_gateway() {
    let (gateway, _) = orchestrator();
    let schedule_id = gateway
        .create_schedule(ScheduleBuilder::new().build())
        .await
        .unwrap();

    let paused = gateway.pause_schedule(schedule_id).await.unwrap();
    assert_eq!(paused.status, ScheduleStatus::Paused);
    let resumed = gateway.resume_schedule(schedule_id).await.unwrap();
    assert_eq!(resumed.status, ScheduleStatus::Scheduled);
    assert!(resumed.next_execution.is_some());

    let cancelled = gateway.cancel_schedule(schedule_id).await.unwrap();
    assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
    let err = gateway.resume_schedule(schedule_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_cancelling_scheduled_request_ends_execution() {
    let (gateway, _) = orchestrator();
    let scheduler = gateway.scheduler().clone();
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

    gateway.cancel_import(request_id).await.unwrap();

    let history = scheduler.execution_history(schedule.id).await.unwrap();
    assert_eq!(history[0].status, ExecutionStatus::Cancelled);
    let schedule = scheduler.get_schedule(schedule.id).await.unwrap().unwrap();
    // 循环调度继续下一次触发
    assert_eq!(schedule.status, ScheduleStatus::Scheduled);
    assert!(schedule.active_execution_id.is_none());

    let err = gateway.cancel_import(request_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
}
