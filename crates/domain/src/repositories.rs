//! 仓储抽象
//!
//! 调度定义与执行历史的持久化接口，内存与 SQLite 实现位于 infrastructure

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_errors::OrchestratorResult;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::{ExecutionHistory, ExecutionStatus, Schedule, ScheduleStatus};

/// 调度查询条件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleFilter {
    pub status: Option<ScheduleStatus>,
    pub tenant_id: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<usize>,
}

impl ScheduleFilter {
    pub fn matches(&self, schedule: &Schedule) -> bool {
        self.status.map_or(true, |status| schedule.status == status)
            && self
                .tenant_id
                .as_deref()
                .map_or(true, |tenant| schedule.tenant_id == tenant)
            && self
                .is_active
                .map_or(true, |active| schedule.is_active == active)
    }
}

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn create(&self, schedule: &Schedule) -> OrchestratorResult<Schedule>;
    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<Schedule>>;
    async fn update(&self, schedule: &Schedule) -> OrchestratorResult<()>;
    async fn list(&self, filter: &ScheduleFilter) -> OrchestratorResult<Vec<Schedule>>;
    /// SCHEDULED、启用且 next_execution <= now 的调度，按 next_execution 升序
    async fn find_due(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<Schedule>>;
    async fn find_by_status(&self, status: ScheduleStatus) -> OrchestratorResult<Vec<Schedule>>;
}

#[async_trait]
pub trait ExecutionHistoryRepository: Send + Sync {
    async fn create(&self, history: &ExecutionHistory) -> OrchestratorResult<ExecutionHistory>;
    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<ExecutionHistory>>;
    async fn update(&self, history: &ExecutionHistory) -> OrchestratorResult<()>;
    /// 按 started_at 倒序
    async fn list_by_schedule(&self, schedule_id: Uuid)
        -> OrchestratorResult<Vec<ExecutionHistory>>;
    async fn list_by_status(
        &self,
        status: ExecutionStatus,
    ) -> OrchestratorResult<Vec<ExecutionHistory>>;
}
