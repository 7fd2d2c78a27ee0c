use std::sync::Arc;

use async_trait::async_trait;
use orchestrator_dispatcher::{AdmissionController, CoordinationServices, ImportScheduler};
use orchestrator_domain::{
    DependencyType, ImportOutcome, ImportRequest, OrchestrationDependency, OrchestrationState,
    Schedule, TenantLimit,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tracing::{info, warn};
use uuid::Uuid;

use crate::interfaces::{ImportGateway, ImportStatusView};

/// 导入编排门面，组合准入控制、调度器与各协调组件
pub struct ImportOrchestrator {
    scheduler: Arc<ImportScheduler>,
    services: CoordinationServices,
    admission: AdmissionController,
}

impl ImportOrchestrator {
    pub fn new(scheduler: Arc<ImportScheduler>, services: CoordinationServices) -> Self {
        Self {
            admission: AdmissionController::new(services.clone()),
            scheduler,
            services,
        }
    }

    pub fn scheduler(&self) -> &Arc<ImportScheduler> {
        &self.scheduler
    }

    pub fn services(&self) -> &CoordinationServices {
        &self.services
    }

    /// 租户的全部请求，按提交时间排序
    pub fn list_imports(&self, tenant_id: &str) -> Vec<ImportStatusView> {
        self.services
            .queue
            .list_by_tenant(tenant_id)
            .iter()
            .map(|r| self.status_view(r))
            .collect()
    }

    fn status_view(&self, request: &ImportRequest) -> ImportStatusView {
        let mut view = ImportStatusView::from(request);
        view.queue_position = self.services.queue.queue_position(request.id);
        view
    }
}

#[async_trait]
impl ImportGateway for ImportOrchestrator {
    async fn submit_import(&self, request: ImportRequest) -> OrchestratorResult<Uuid> {
        let tenant_id = request.tenant_id.clone();
        let import_type = request.import_type.clone();

        self.admission.admit(request).map_err(|err| {
            info!(
                tenant.id = %tenant_id,
                import_type = %import_type,
                error_kind = err.error_kind(),
                error = %err,
                "导入请求准入被拒绝"
            );
            err
        })
    }

    /// 取消请求；调度产生的请求同时结束对应的执行
    async fn cancel_import(&self, request_id: Uuid) -> OrchestratorResult<ImportStatusView> {
        let request = self.services.queue.cancel(request_id)?;

        if let Some(execution_id) = request.execution_id {
            if let Err(e) = self
                .scheduler
                .complete_execution(execution_id, &ImportOutcome::cancelled("导入请求已取消"))
                .await
            {
                warn!(
                    request.id = %request_id,
                    execution.id = %execution_id,
                    error = %e,
                    "结束调度执行失败"
                );
            }
        } else if let Some(orchestration_id) = request.orchestration_id {
            let graph = &self.services.dependency_graph;
            graph.set_state(orchestration_id, OrchestrationState::Cancelled);
            graph.mark_resources_released(orchestration_id);
        }

        info!(request.id = %request_id, tenant.id = %request.tenant_id, "导入请求已取消");
        Ok(self.status_view(&request))
    }

    async fn get_status(&self, request_id: Uuid) -> OrchestratorResult<ImportStatusView> {
        self.services
            .queue
            .get(request_id)
            .map(|request| self.status_view(&request))
            .ok_or(OrchestratorError::RequestNotFound { id: request_id })
    }

    async fn create_schedule(&self, schedule: Schedule) -> OrchestratorResult<Uuid> {
        Ok(self.scheduler.create_schedule(schedule).await?.id)
    }

    async fn pause_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        self.scheduler.pause_schedule(schedule_id).await
    }

    async fn resume_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        self.scheduler.resume_schedule(schedule_id).await
    }

    async fn cancel_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        self.scheduler.cancel_schedule(schedule_id).await
    }

    async fn add_orchestration_dependency(
        &self,
        orchestration_id: Uuid,
        depends_on_id: Uuid,
        dependency_type: DependencyType,
    ) -> OrchestratorResult<OrchestrationDependency> {
        self.services
            .dependency_graph
            .add_dependency(orchestration_id, depends_on_id, dependency_type)
    }

    async fn set_tenant_limit(&self, limit: TenantLimit) -> OrchestratorResult<()> {
        self.services.quota.set_limit(limit)
    }
}
