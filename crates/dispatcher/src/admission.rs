//! 准入控制
//!
//! 依赖检查、资源预留、租户配额与入队组合成一次非阻塞的准入判断。
//! 任一环节失败都立即返回错误，不会等待资源。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_config::AppConfig;
use orchestrator_domain::{ImportRequest, Schedule};
use orchestrator_errors::OrchestratorResult;
use orchestrator_infrastructure::{
    AuditTrail, ImportQueueManager, LimitTemplate, MetricsCollector, ResourceLockManager,
    ResourceReservationManager, ResourceUsageSource, TenantQuotaEnforcer,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dependency_graph::OrchestrationDependencyGraph;

/// 调度器、worker 与门面共享的协调组件
#[derive(Clone)]
pub struct CoordinationServices {
    pub queue: Arc<ImportQueueManager>,
    pub locks: Arc<ResourceLockManager>,
    pub reservations: Arc<ResourceReservationManager>,
    pub quota: Arc<TenantQuotaEnforcer>,
    pub dependency_graph: Arc<OrchestrationDependencyGraph>,
    pub audit: AuditTrail,
    pub metrics: Arc<MetricsCollector>,
}

impl CoordinationServices {
    pub fn from_config(
        config: &AppConfig,
        audit: AuditTrail,
        metrics: Arc<MetricsCollector>,
    ) -> OrchestratorResult<Self> {
        let queue = Arc::new(ImportQueueManager::new(
            config.queue.max_depth,
            audit.clone(),
            metrics.clone(),
        ));
        let usage: Arc<dyn ResourceUsageSource> = queue.clone();
        let quota = Arc::new(TenantQuotaEnforcer::new(
            LimitTemplate::from_config(&config.quota)?,
            usage,
            audit.clone(),
            metrics.clone(),
        ));
        let locks = Arc::new(ResourceLockManager::new(audit.clone(), metrics.clone()));
        let reservations = Arc::new(ResourceReservationManager::new(
            config.reservations.capacities.clone(),
            audit.clone(),
            metrics.clone(),
        ));
        let dependency_graph = Arc::new(OrchestrationDependencyGraph::new(audit.clone()));

        Ok(Self {
            queue,
            locks,
            reservations,
            quota,
            dependency_graph,
            audit,
            metrics,
        })
    }
}

/// 调度请求准入成功后的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedExecution {
    pub request_id: Uuid,
    pub reservation_ids: Vec<Uuid>,
}

pub struct AdmissionController {
    services: CoordinationServices,
}

impl AdmissionController {
    pub fn new(services: CoordinationServices) -> Self {
        Self { services }
    }

    fn check_dependencies(&self, request: &ImportRequest) -> OrchestratorResult<()> {
        match request.orchestration_id {
            Some(orchestration_id) => self
                .services
                .dependency_graph
                .ensure_satisfied(orchestration_id),
            None => Ok(()),
        }
    }

    fn enqueue_under_quota(&self, request: ImportRequest) -> OrchestratorResult<Uuid> {
        let tenant_id = request.tenant_id.clone();
        let requirements = request.resource_requirements.clone();
        let orchestration_id = request.orchestration_id;
        let queue = &self.services.queue;
        let graph = &self.services.dependency_graph;

        // 请求入队后 worker 随时可能上报终态，RUNNING 必须先于入队写入
        self.services
            .quota
            .admit_request(&tenant_id, &requirements, move || {
                let previous = orchestration_id.map(|id| (id, graph.enter_running(id)));
                let result = queue.enqueue(request);
                if let (Err(_), Some((id, snapshot))) = (&result, previous) {
                    graph.restore(id, snapshot);
                }
                result
            })
    }

    /// 直接提交的导入请求：校验、依赖、配额、入队
    pub fn admit(&self, request: ImportRequest) -> OrchestratorResult<Uuid> {
        request.validate()?;
        self.check_dependencies(&request)?;
        self.enqueue_under_quota(request)
    }

    /// 调度触发的导入请求，额外持有资源预留
    ///
    /// 优先使用覆盖 `now` 的预订；缺少的类型在 `[now, now + timeout)` 上现场申请。
    /// 配额拒绝时只回收现场申请的预留，预订保持不动。
    pub fn admit_scheduled(
        &self,
        schedule: &Schedule,
        request: ImportRequest,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<AdmittedExecution> {
        request.validate()?;
        self.check_dependencies(&request)?;

        let (held, fresh) = self.hold_reservations(schedule, now)?;
        let request_id = match self.enqueue_under_quota(request) {
            Ok(id) => id,
            Err(err) => {
                self.release_all(&fresh);
                return Err(err);
            }
        };

        for id in &held {
            if let Err(e) = self.services.reservations.activate(*id) {
                warn!(reservation.id = %id, error = %e, "激活资源预留失败");
            }
        }
        Ok(AdmittedExecution {
            request_id,
            reservation_ids: held,
        })
    }

    fn hold_reservations(
        &self,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<(Vec<Uuid>, Vec<Uuid>)> {
        let reservations = &self.services.reservations;
        let prebooked = reservations.find_reserved_covering(schedule.id, now);
        let until = now + schedule.timeout();

        let mut held = Vec::new();
        let mut fresh = Vec::new();
        for (resource_type, amount) in &schedule.resource_requirements {
            if *amount == 0 {
                continue;
            }
            if let Some(existing) = prebooked
                .iter()
                .find(|r| &r.resource_type == resource_type)
            {
                held.push(existing.id);
                continue;
            }
            match reservations.reserve(
                schedule.id,
                &schedule.tenant_id,
                resource_type,
                *amount,
                now,
                until,
            ) {
                Ok(reservation) => {
                    held.push(reservation.id);
                    fresh.push(reservation.id);
                }
                Err(err) => {
                    self.release_all(&fresh);
                    return Err(err);
                }
            }
        }
        debug!(
            schedule.id = %schedule.id,
            held = held.len(),
            fresh = fresh.len(),
            "调度资源预留就绪"
        );
        Ok((held, fresh))
    }

    fn release_all(&self, ids: &[Uuid]) {
        for id in ids {
            if let Err(e) = self.services.reservations.release(*id) {
                warn!(reservation.id = %id, error = %e, "回收资源预留失败");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_domain::{resource_types, DependencyType, OrchestrationState, ReservationStatus};
    use orchestrator_errors::OrchestratorError;

    fn services() -> CoordinationServices {
        let mut config = AppConfig::default();
        config
            .reservations
            .capacities
            .insert(resource_types::CPU_SLOTS.to_string(), 4);
        CoordinationServices::from_config(
            &config,
            AuditTrail::tracing(),
            Arc::new(MetricsCollector::new()),
        )
        .unwrap()
    }

    fn scheduled_request(schedule: &Schedule) -> ImportRequest {
        let mut request = ImportRequest::new(
            schedule.tenant_id.clone(),
            schedule.import_type.clone(),
            schedule.created_by.clone(),
            schedule.priority,
        );
        request.schedule_id = Some(schedule.id);
        request.resource_requirements = schedule.resource_requirements.clone();
        request.orchestration_id = schedule.orchestration_id;
        request
    }

    #[test]
    fn test_admit_marks_orchestration_running() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let orchestration = Uuid::new_v4();

        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        request.orchestration_id = Some(orchestration);
        let id = admission.admit(request).unwrap();

        assert!(services.queue.get(id).is_some());
        assert_eq!(
            services.dependency_graph.state(orchestration),
            Some(OrchestrationState::Running)
        );
    }

    #[test]
    fn test_failed_enqueue_restores_orchestration_state() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let orchestration = Uuid::new_v4();

        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        request.orchestration_id = Some(orchestration);
        services.queue.enqueue(request.clone()).unwrap();
        services
            .dependency_graph
            .set_state(orchestration, OrchestrationState::Failed);

        // 同一请求重复入队失败
        let err = admission.admit(request).unwrap_err();
        assert!(matches!(err, OrchestratorError::ValidationError(_)));
        assert_eq!(
            services.dependency_graph.state(orchestration),
            Some(OrchestrationState::Failed)
        );
    }

    #[test]
    fn test_terminal_state_reported_right_after_enqueue_is_kept() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let total = 50;
        let orchestrations: Vec<Uuid> = (0..total).map(|_| Uuid::new_v4()).collect();

        std::thread::scope(|scope| {
            let worker_services = services.clone();
            scope.spawn(move || {
                let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
                let mut finished = 0;
                while finished < total && std::time::Instant::now() < deadline {
                    match worker_services.queue.dequeue_next("worker-1").unwrap() {
                        Some(request) => {
                            worker_services.dependency_graph.set_state(
                                request.orchestration_id.unwrap(),
                                OrchestrationState::Succeeded,
                            );
                            finished += 1;
                        }
                        None => std::thread::yield_now(),
                    }
                }
            });

            for (i, orchestration) in orchestrations.iter().enumerate() {
                let mut request = ImportRequest::new(format!("tenant-{i}"), "csv", "alice", 5);
                request.orchestration_id = Some(*orchestration);
                admission.admit(request).unwrap();
            }
        });

        for orchestration in &orchestrations {
            assert_eq!(
                services.dependency_graph.state(*orchestration),
                Some(OrchestrationState::Succeeded)
            );
        }
    }

    #[test]
    fn test_unsatisfied_dependency_never_reaches_queue() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        services
            .dependency_graph
            .add_dependency(a, b, DependencyType::Sequential)
            .unwrap();

        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        request.orchestration_id = Some(a);
        let err = admission.admit(request).unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyNotSatisfied { .. }));
        assert_eq!(services.queue.queued_len(), 0);
    }

    #[test]
    fn test_scheduled_admission_activates_prebooked_reservation() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let now = Utc::now();

        let mut schedule = Schedule::new("s", "acme", "csv", "0 0 * * * *", true, "ops");
        schedule
            .resource_requirements
            .insert(resource_types::CPU_SLOTS.to_string(), 2);
        let prebooked = services
            .reservations
            .reserve(
                schedule.id,
                "acme",
                resource_types::CPU_SLOTS,
                2,
                now - chrono::Duration::minutes(1),
                now + chrono::Duration::minutes(59),
            )
            .unwrap();

        let admitted = admission
            .admit_scheduled(&schedule, scheduled_request(&schedule), now)
            .unwrap();
        assert_eq!(admitted.reservation_ids, vec![prebooked.id]);
        assert_eq!(
            services.reservations.get(prebooked.id).unwrap().status,
            ReservationStatus::Active
        );
    }

    #[test]
    fn test_quota_denial_releases_fresh_reservations() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let now = Utc::now();

        // 默认 concurrent_imports = 2
        for _ in 0..2 {
            admission
                .admit(ImportRequest::new("acme", "csv", "alice", 5))
                .unwrap();
        }

        let mut schedule = Schedule::new("s", "acme", "csv", "0 0 * * * *", true, "ops");
        schedule
            .resource_requirements
            .insert(resource_types::CPU_SLOTS.to_string(), 1);
        let err = admission
            .admit_scheduled(&schedule, scheduled_request(&schedule), now)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::QuotaExceeded { .. }));

        let reservations = services.reservations.find_for_schedule(schedule.id);
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].status, ReservationStatus::Released);
    }

    #[test]
    fn test_reservation_conflict_blocks_schedule() {
        let services = services();
        let admission = AdmissionController::new(services.clone());
        let now = Utc::now();

        services
            .reservations
            .reserve(
                Uuid::new_v4(),
                "other",
                resource_types::CPU_SLOTS,
                4,
                now,
                now + chrono::Duration::hours(2),
            )
            .unwrap();

        let mut schedule = Schedule::new("s", "acme", "csv", "0 0 * * * *", true, "ops");
        schedule
            .resource_requirements
            .insert(resource_types::CPU_SLOTS.to_string(), 1);
        let err = admission
            .admit_scheduled(&schedule, scheduled_request(&schedule), now)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ReservationConflict { .. }));
        assert_eq!(services.queue.queued_len(), 0);
    }
}
