use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{
    DependencyType, ImportRequest, ImportRequestStatus, OrchestrationDependency, Schedule,
    TenantLimit,
};
use orchestrator_errors::OrchestratorResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 导入请求的对外状态视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatusView {
    pub request_id: Uuid,
    pub tenant_id: String,
    pub status: ImportRequestStatus,
    /// 仅排队中的请求有名次，从 1 开始
    pub queue_position: Option<usize>,
    pub assigned_worker: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: Option<String>,
}

impl From<&ImportRequest> for ImportStatusView {
    fn from(request: &ImportRequest) -> Self {
        Self {
            request_id: request.id,
            tenant_id: request.tenant_id.clone(),
            status: request.status,
            queue_position: None,
            assigned_worker: request.assigned_worker.clone(),
            requested_at: request.requested_at,
            started_at: request.started_at,
            completed_at: request.completed_at,
            records_processed: request.records_processed,
            error_message: request.error_message.clone(),
        }
    }
}

/// 导入编排的入口
///
/// 准入类错误（校验、依赖、配额、预留）同步返回，不会进入队列。
#[async_trait]
pub trait ImportGateway: Send + Sync {
    async fn submit_import(&self, request: ImportRequest) -> OrchestratorResult<Uuid>;

    async fn cancel_import(&self, request_id: Uuid) -> OrchestratorResult<ImportStatusView>;

    async fn get_status(&self, request_id: Uuid) -> OrchestratorResult<ImportStatusView>;

    async fn create_schedule(&self, schedule: Schedule) -> OrchestratorResult<Uuid>;

    async fn pause_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule>;

    async fn resume_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule>;

    async fn cancel_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule>;

    async fn add_orchestration_dependency(
        &self,
        orchestration_id: Uuid,
        depends_on_id: Uuid,
        dependency_type: DependencyType,
    ) -> OrchestratorResult<OrchestrationDependency>;

    async fn set_tenant_limit(&self, limit: TenantLimit) -> OrchestratorResult<()>;
}
