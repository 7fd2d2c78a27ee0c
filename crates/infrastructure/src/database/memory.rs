//! 内存仓储，未配置数据库时使用

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_domain::{
    ExecutionHistory, ExecutionHistoryRepository, ExecutionStatus, Schedule, ScheduleFilter,
    ScheduleRepository, ScheduleStatus,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryScheduleRepository {
    schedules: RwLock<HashMap<Uuid, Schedule>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn create(&self, schedule: &Schedule) -> OrchestratorResult<Schedule> {
        let mut schedules = self.schedules.write().await;
        if schedules.contains_key(&schedule.id) {
            return Err(OrchestratorError::validation_error(format!(
                "调度 {} 已存在",
                schedule.id
            )));
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(schedule.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn update(&self, schedule: &Schedule) -> OrchestratorResult<()> {
        let mut schedules = self.schedules.write().await;
        match schedules.get_mut(&schedule.id) {
            Some(existing) => {
                *existing = schedule.clone();
                Ok(())
            }
            None => Err(OrchestratorError::ScheduleNotFound { id: schedule.id }),
        }
    }

    async fn list(&self, filter: &ScheduleFilter) -> OrchestratorResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut found: Vec<Schedule> = schedules
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.created_at);
        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut due: Vec<Schedule> = schedules.values().filter(|s| s.is_due(now)).cloned().collect();
        due.sort_by_key(|s| (s.next_execution, s.priority));
        Ok(due)
    }

    async fn find_by_status(&self, status: ScheduleStatus) -> OrchestratorResult<Vec<Schedule>> {
        self.list(&ScheduleFilter {
            status: Some(status),
            ..Default::default()
        })
        .await
    }
}

#[derive(Default)]
pub struct InMemoryExecutionHistoryRepository {
    executions: RwLock<HashMap<Uuid, ExecutionHistory>>,
}

impl InMemoryExecutionHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionHistoryRepository for InMemoryExecutionHistoryRepository {
    async fn create(&self, history: &ExecutionHistory) -> OrchestratorResult<ExecutionHistory> {
        self.executions
            .write()
            .await
            .insert(history.id, history.clone());
        Ok(history.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> OrchestratorResult<Option<ExecutionHistory>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, history: &ExecutionHistory) -> OrchestratorResult<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&history.id) {
            Some(existing) if existing.is_sealed() => Err(OrchestratorError::InvalidTransition {
                entity: "ExecutionHistory",
                id: history.id,
                from: existing.status.to_string(),
                to: history.status.to_string(),
            }),
            Some(existing) => {
                *existing = history.clone();
                Ok(())
            }
            None => Err(OrchestratorError::ExecutionNotFound { id: history.id }),
        }
    }

    async fn list_by_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Vec<ExecutionHistory>> {
        let executions = self.executions.read().await;
        let mut found: Vec<ExecutionHistory> = executions
            .values()
            .filter(|h| h.schedule_id == schedule_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> OrchestratorResult<Vec<ExecutionHistory>> {
        let executions = self.executions.read().await;
        let mut found: Vec<ExecutionHistory> = executions
            .values()
            .filter(|h| h.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(found)
    }
}
