//! 领域事件
//!
//! 审计事件与 worker 上报的状态更新

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{ImportOutcome, ImportRequestStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RequestQueued,
    RequestDequeued,
    RequestCompleted,
    RequestFailed,
    RequestCancelled,
    LockAcquired,
    LockReleased,
    LockExpired,
    ReservationCreated,
    ReservationActivated,
    ReservationReleased,
    ReservationExpired,
    QuotaDenied,
    QuotaWarning,
    TenantLimitUpdated,
    ScheduleCreated,
    ScheduleFired,
    ScheduleRetryScheduled,
    ScheduleRetriesExhausted,
    SchedulePaused,
    ScheduleResumed,
    ScheduleCancelled,
    ScheduleDeactivated,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionTimedOut,
    DependencyAdded,
    DependencyRemoved,
}

impl AuditEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEventType::RequestQueued => "request_queued",
            AuditEventType::RequestDequeued => "request_dequeued",
            AuditEventType::RequestCompleted => "request_completed",
            AuditEventType::RequestFailed => "request_failed",
            AuditEventType::RequestCancelled => "request_cancelled",
            AuditEventType::LockAcquired => "lock_acquired",
            AuditEventType::LockReleased => "lock_released",
            AuditEventType::LockExpired => "lock_expired",
            AuditEventType::ReservationCreated => "reservation_created",
            AuditEventType::ReservationActivated => "reservation_activated",
            AuditEventType::ReservationReleased => "reservation_released",
            AuditEventType::ReservationExpired => "reservation_expired",
            AuditEventType::QuotaDenied => "quota_denied",
            AuditEventType::QuotaWarning => "quota_warning",
            AuditEventType::TenantLimitUpdated => "tenant_limit_updated",
            AuditEventType::ScheduleCreated => "schedule_created",
            AuditEventType::ScheduleFired => "schedule_fired",
            AuditEventType::ScheduleRetryScheduled => "schedule_retry_scheduled",
            AuditEventType::ScheduleRetriesExhausted => "schedule_retries_exhausted",
            AuditEventType::SchedulePaused => "schedule_paused",
            AuditEventType::ScheduleResumed => "schedule_resumed",
            AuditEventType::ScheduleCancelled => "schedule_cancelled",
            AuditEventType::ScheduleDeactivated => "schedule_deactivated",
            AuditEventType::ExecutionCompleted => "execution_completed",
            AuditEventType::ExecutionFailed => "execution_failed",
            AuditEventType::ExecutionTimedOut => "execution_timed_out",
            AuditEventType::DependencyAdded => "dependency_added",
            AuditEventType::DependencyRemoved => "dependency_removed",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态变更的审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        entity_id: impl ToString,
        details: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            entity_id: entity_id.to_string(),
            details,
            occurred_at: Utc::now(),
        }
    }
}

/// worker 完成一次请求后发布给调度端的状态更新
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportStatusUpdate {
    pub request_id: Uuid,
    pub schedule_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub worker_id: String,
    pub status: ImportRequestStatus,
    pub outcome: ImportOutcome,
    pub timestamp: DateTime<Utc>,
}

impl ImportStatusUpdate {
    /// 是否属于某个调度的执行
    pub fn is_scheduled_execution(&self) -> bool {
        self.execution_id.is_some()
    }
}
