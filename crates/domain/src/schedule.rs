//! 调度定义与执行历史
//!
//! `Schedule` 描述一次性或周期性的导入计划，`ExecutionHistory` 是每次触发的
//! 只追加审计记录。调度器在一次执行的多次重试之间复用同一条执行记录，
//! 通过 `active_execution_id` / `current_attempt` 追踪。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{
    is_valid_priority, LockRequirement, ResourceRequirements, MAX_PRIORITY, MIN_PRIORITY,
};

/// 单次执行超时上限：一周
pub const MAX_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;
/// 重试间隔上限：一周
pub const MAX_RETRY_DELAY_SECONDS: u64 = 7 * 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Scheduled,
    Executing,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl ScheduleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "SCHEDULED",
            ScheduleStatus::Executing => "EXECUTING",
            ScheduleStatus::Completed => "COMPLETED",
            ScheduleStatus::Failed => "FAILED",
            ScheduleStatus::Cancelled => "CANCELLED",
            ScheduleStatus::Paused => "PAUSED",
        }
    }

    /// 不再触发的终态
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ScheduleStatus::Completed | ScheduleStatus::Failed | ScheduleStatus::Cancelled
        )
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(ScheduleStatus::Scheduled),
            "EXECUTING" => Ok(ScheduleStatus::Executing),
            "COMPLETED" => Ok(ScheduleStatus::Completed),
            "FAILED" => Ok(ScheduleStatus::Failed),
            "CANCELLED" => Ok(ScheduleStatus::Cancelled),
            "PAUSED" => Ok(ScheduleStatus::Paused),
            _ => Err(OrchestratorError::Serialization(format!(
                "Invalid schedule status: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub name: String,
    pub tenant_id: String,
    pub orchestration_id: Option<Uuid>,
    pub import_type: String,
    /// CRON 表达式，或一次性调度的 RFC 3339 时间
    pub schedule_expression: String,
    pub recurring: bool,
    pub priority: u8,
    pub created_by: String,
    pub status: ScheduleStatus,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub import_configuration: serde_json::Value,
    pub resource_requirements: ResourceRequirements,
    pub lock_requirements: Vec<LockRequirement>,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub timeout_minutes: u64,
    pub is_active: bool,
    pub active_execution_id: Option<Uuid>,
    pub active_request_id: Option<Uuid>,
    pub current_attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        import_type: impl Into<String>,
        schedule_expression: impl Into<String>,
        recurring: bool,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tenant_id: tenant_id.into(),
            orchestration_id: None,
            import_type: import_type.into(),
            schedule_expression: schedule_expression.into(),
            recurring,
            priority: 10,
            created_by: created_by.into(),
            status: ScheduleStatus::Scheduled,
            next_execution: None,
            last_execution: None,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            import_configuration: serde_json::Value::Null,
            resource_requirements: ResourceRequirements::new(),
            lock_requirements: Vec::new(),
            max_retries: 3,
            retry_delay_seconds: 900,
            timeout_minutes: 60,
            is_active: true,
            active_execution_id: None,
            active_request_id: None,
            current_attempt: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::validation_error("调度名称不能为空"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(OrchestratorError::validation_error("tenant_id 不能为空"));
        }
        if self.import_type.trim().is_empty() {
            return Err(OrchestratorError::validation_error("import_type 不能为空"));
        }
        if self.schedule_expression.trim().is_empty() {
            return Err(OrchestratorError::validation_error("调度表达式不能为空"));
        }
        if !is_valid_priority(self.priority) {
            return Err(OrchestratorError::validation_error(format!(
                "优先级 {} 超出范围 [{MIN_PRIORITY}, {MAX_PRIORITY}]",
                self.priority
            )));
        }
        if self.timeout_minutes == 0 || self.timeout_minutes > MAX_TIMEOUT_MINUTES {
            return Err(OrchestratorError::validation_error(format!(
                "timeout_minutes 必须在 [1, {MAX_TIMEOUT_MINUTES}] 范围内，当前为 {}",
                self.timeout_minutes
            )));
        }
        // 重试时间必须严格晚于当前时间
        if self.retry_delay_seconds == 0 || self.retry_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(OrchestratorError::validation_error(format!(
                "retry_delay_seconds 必须在 [1, {MAX_RETRY_DELAY_SECONDS}] 范围内，当前为 {}",
                self.retry_delay_seconds
            )));
        }
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.status == ScheduleStatus::Scheduled
            && self.next_execution.is_some_and(|next| next <= now)
    }

    /// 未经校验的值（例如直接从存储读出）会被收敛到合法范围
    pub fn retry_delay(&self) -> Duration {
        let seconds = self.retry_delay_seconds.clamp(1, MAX_RETRY_DELAY_SECONDS);
        Duration::seconds(i64::try_from(seconds).unwrap_or(1))
    }

    pub fn timeout(&self) -> Duration {
        let minutes = self.timeout_minutes.clamp(1, MAX_TIMEOUT_MINUTES);
        Duration::minutes(i64::try_from(minutes).unwrap_or(1))
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_minutes.clamp(1, MAX_TIMEOUT_MINUTES) * 60
    }

    pub fn can_retry(&self) -> bool {
        self.current_attempt < self.max_retries
    }

    /// 一次执行最终结束（成功，或重试耗尽后失败）
    pub fn record_outcome(&mut self, success: bool, at: DateTime<Utc>) {
        self.execution_count += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_execution = Some(at);
        self.clear_execution_cursor();
        self.updated_at = at;
    }

    pub fn clear_execution_cursor(&mut self) {
        self.active_execution_id = None;
        self.active_request_id = None;
        self.current_attempt = 0;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Started => "STARTED",
            ExecutionStatus::InProgress => "IN_PROGRESS",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(ExecutionStatus::Started),
            "IN_PROGRESS" => Ok(ExecutionStatus::InProgress),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            "CANCELLED" => Ok(ExecutionStatus::Cancelled),
            _ => Err(OrchestratorError::Serialization(format!(
                "Invalid execution status: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub records_processed: u64,
    pub error_message: Option<String>,
    pub execution_details: serde_json::Value,
    pub attempts: u32,
}

impl ExecutionHistory {
    pub fn new(schedule_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            started_at,
            completed_at: None,
            status: ExecutionStatus::Started,
            records_processed: 0,
            error_message: None,
            execution_details: serde_json::json!({ "attempts": [] }),
            attempts: 0,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.status.is_terminal()
    }

    fn sealed_error(&self, to: ExecutionStatus) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            entity: "ExecutionHistory",
            id: self.id,
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn mark_in_progress(&mut self) -> OrchestratorResult<()> {
        if self.is_sealed() {
            return Err(self.sealed_error(ExecutionStatus::InProgress));
        }
        self.status = ExecutionStatus::InProgress;
        Ok(())
    }

    /// 记录一次尝试，详情追加到 execution_details.attempts
    pub fn record_attempt(&mut self, at: DateTime<Utc>, detail: serde_json::Value) {
        self.attempts += 1;
        let entry = serde_json::json!({
            "attempt": self.attempts,
            "at": at,
            "detail": detail,
        });
        match self.execution_details.get_mut("attempts") {
            Some(serde_json::Value::Array(items)) => items.push(entry),
            _ => {
                self.execution_details = serde_json::json!({ "attempts": [entry] });
            }
        }
    }

    pub fn seal(
        &mut self,
        status: ExecutionStatus,
        at: DateTime<Utc>,
        records_processed: u64,
        error_message: Option<String>,
    ) -> OrchestratorResult<()> {
        if self.is_sealed() || !status.is_terminal() {
            return Err(self.sealed_error(status));
        }
        self.status = status;
        self.completed_at = Some(at);
        self.records_processed = records_processed;
        self.error_message = error_message;
        Ok(())
    }
}
