use std::fmt;

use chrono::{DateTime, Utc};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value_objects::{
    is_valid_priority, resource_types, LockRequirement, LockType, ResourceKey,
    ResourceRequirements, MAX_PRIORITY, MIN_PRIORITY,
};

// ---------------------------------------------------------------------------
// 导入请求
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportRequestStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ImportRequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportRequestStatus::Completed
                | ImportRequestStatus::Failed
                | ImportRequestStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            ImportRequestStatus::Queued | ImportRequestStatus::Processing
        )
    }

    /// QUEUED→PROCESSING→{COMPLETED|FAILED}，{QUEUED|PROCESSING}→CANCELLED
    pub fn can_transition_to(self, next: ImportRequestStatus) -> bool {
        use ImportRequestStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Queued, Cancelled)
                | (Processing, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportRequestStatus::Queued => "QUEUED",
            ImportRequestStatus::Processing => "PROCESSING",
            ImportRequestStatus::Completed => "COMPLETED",
            ImportRequestStatus::Failed => "FAILED",
            ImportRequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for ImportRequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub id: Uuid,
    pub tenant_id: String,
    pub orchestration_id: Option<Uuid>,
    pub schedule_id: Option<Uuid>,
    pub execution_id: Option<Uuid>,
    pub priority: u8,
    pub status: ImportRequestStatus,
    pub import_type: String,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub estimated_duration_seconds: u64,
    pub resource_requirements: ResourceRequirements,
    pub lock_requirements: Vec<LockRequirement>,
    pub configuration: serde_json::Value,
    pub assigned_worker: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: u64,
    pub error_message: Option<String>,
}

impl ImportRequest {
    pub fn new(
        tenant_id: impl Into<String>,
        import_type: impl Into<String>,
        requested_by: impl Into<String>,
        priority: u8,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            orchestration_id: None,
            schedule_id: None,
            execution_id: None,
            priority,
            status: ImportRequestStatus::Queued,
            import_type: import_type.into(),
            requested_by: requested_by.into(),
            requested_at: Utc::now(),
            estimated_duration_seconds: 0,
            resource_requirements: ResourceRequirements::new(),
            lock_requirements: Vec::new(),
            configuration: serde_json::Value::Null,
            assigned_worker: None,
            started_at: None,
            completed_at: None,
            records_processed: 0,
            error_message: None,
        }
    }

    /// 入队前的校验，失败时不得修改任何状态
    pub fn validate(&self) -> OrchestratorResult<()> {
        if !is_valid_priority(self.priority) {
            return Err(OrchestratorError::validation_error(format!(
                "优先级 {} 超出范围 [{MIN_PRIORITY}, {MAX_PRIORITY}]",
                self.priority
            )));
        }
        if self.import_type.trim().is_empty() {
            return Err(OrchestratorError::validation_error("import_type 不能为空"));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(OrchestratorError::validation_error("tenant_id 不能为空"));
        }
        for requirement in &self.lock_requirements {
            if requirement.key.resource_type.trim().is_empty()
                || requirement.key.resource_id.trim().is_empty()
            {
                return Err(OrchestratorError::validation_error(format!(
                    "锁需求的资源标识不能为空: {}",
                    requirement.key
                )));
            }
        }
        Ok(())
    }

    /// 该请求对某类资源的占用量；每个请求隐式占用一个并发导入名额
    pub fn requirement(&self, resource_type: &str) -> u64 {
        match self.resource_requirements.get(resource_type) {
            Some(amount) => *amount,
            None if resource_type == resource_types::CONCURRENT_IMPORTS => 1,
            None => 0,
        }
    }

    pub fn transition_to(
        &mut self,
        next: ImportRequestStatus,
        at: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidTransition {
                entity: "ImportRequest",
                id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        match next {
            ImportRequestStatus::Processing => {
                if self.started_at.is_none() {
                    self.started_at = Some(at);
                }
            }
            s if s.is_terminal() => {
                if self.completed_at.is_none() {
                    self.completed_at = Some(at);
                }
            }
            _ => {}
        }
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn execution_duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_milliseconds()),
            _ => None,
        }
    }
}

const CANCELLED_KIND: &str = "cancelled";

/// 执行器返回的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub records_processed: u64,
    pub error_message: Option<String>,
    /// 失败类别，例如 executor_failure / execution_timeout / lock_conflict
    pub error_kind: Option<String>,
    pub details: serde_json::Value,
}

impl ImportOutcome {
    pub fn success(records_processed: u64) -> Self {
        Self {
            success: true,
            records_processed,
            error_message: None,
            error_kind: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            records_processed: 0,
            error_message: Some(message.into()),
            error_kind: Some("executor_failure".to_string()),
            details: serde_json::Value::Null,
        }
    }

    pub fn from_error(err: &OrchestratorError) -> Self {
        Self {
            success: false,
            records_processed: 0,
            error_message: Some(err.to_string()),
            error_kind: Some(err.error_kind().to_string()),
            details: serde_json::Value::Null,
        }
    }

    /// 请求在执行前或执行中被取消
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            records_processed: 0,
            error_message: Some(reason.into()),
            error_kind: Some(CANCELLED_KIND.to_string()),
            details: serde_json::Value::Null,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind.as_deref() == Some(CANCELLED_KIND)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_records(mut self, records_processed: u64) -> Self {
        self.records_processed = records_processed;
        self
    }
}

// ---------------------------------------------------------------------------
// 资源锁
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub key: ResourceKey,
    pub lock_type: LockType,
    pub holder_request_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ResourceLock {
    /// TTL 已过即视为不存在，无论是否已被清扫
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ---------------------------------------------------------------------------
// 资源预留
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Active,
    Released,
    Expired,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReservationStatus::Reserved => "RESERVED",
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Released => "RELEASED",
            ReservationStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReservation {
    pub id: Uuid,
    pub schedule_id: Uuid,
    pub tenant_id: String,
    pub resource_type: String,
    pub resource_amount: u64,
    pub reserved_from: DateTime<Utc>,
    pub reserved_until: DateTime<Utc>,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl ResourceReservation {
    pub fn new(
        schedule_id: Uuid,
        tenant_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_amount: u64,
        reserved_from: DateTime<Utc>,
        reserved_until: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule_id,
            tenant_id: tenant_id.into(),
            resource_type: resource_type.into(),
            resource_amount,
            reserved_from,
            reserved_until,
            status: ReservationStatus::Reserved,
            created_at: Utc::now(),
        }
    }

    /// RESERVED 与 ACTIVE 都计入容量
    pub fn is_holding(&self) -> bool {
        matches!(
            self.status,
            ReservationStatus::Reserved | ReservationStatus::Active
        )
    }

    /// 半开区间 [from, until) 是否相交
    pub fn overlaps(&self, from: DateTime<Utc>, until: DateTime<Utc>) -> bool {
        self.reserved_from < until && from < self.reserved_until
    }

    pub fn covers(&self, at: DateTime<Utc>) -> bool {
        self.reserved_from <= at && at < self.reserved_until
    }

    fn invalid(&self, to: ReservationStatus) -> OrchestratorError {
        OrchestratorError::InvalidTransition {
            entity: "ResourceReservation",
            id: self.id,
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    pub fn activate(&mut self) -> OrchestratorResult<()> {
        if self.status != ReservationStatus::Reserved {
            return Err(self.invalid(ReservationStatus::Active));
        }
        self.status = ReservationStatus::Active;
        Ok(())
    }

    pub fn release(&mut self) -> OrchestratorResult<()> {
        if !self.is_holding() {
            return Err(self.invalid(ReservationStatus::Released));
        }
        self.status = ReservationStatus::Released;
        Ok(())
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> OrchestratorResult<()> {
        if !self.is_holding() || self.reserved_until > now {
            return Err(self.invalid(ReservationStatus::Expired));
        }
        self.status = ReservationStatus::Expired;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 租户配额
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnforcementLevel {
    Hard,
    Soft,
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantLimit {
    pub tenant_id: String,
    pub resource_type: String,
    pub resource_limit: u64,
    pub resource_unit: String,
    pub enforcement_level: EnforcementLevel,
}

impl TenantLimit {
    pub fn new(
        tenant_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_limit: u64,
        resource_unit: impl Into<String>,
        enforcement_level: EnforcementLevel,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            resource_type: resource_type.into(),
            resource_limit,
            resource_unit: resource_unit.into(),
            enforcement_level,
        }
    }

    pub fn validate(&self) -> OrchestratorResult<()> {
        if self.tenant_id.trim().is_empty() || self.resource_type.trim().is_empty() {
            return Err(OrchestratorError::validation_error(
                "tenant_id 和 resource_type 不能为空",
            ));
        }
        if self.resource_limit == 0 {
            return Err(OrchestratorError::validation_error(format!(
                "资源上限必须为正数: {}/{}",
                self.tenant_id, self.resource_type
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 编排依赖
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    Sequential,
    Resource,
    Data,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationDependency {
    pub orchestration_id: Uuid,
    pub depends_on_orchestration_id: Uuid,
    pub dependency_type: DependencyType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl OrchestrationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationState::Succeeded
                | OrchestrationState::Failed
                | OrchestrationState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_import_request_forward_transitions() {
        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        let now = Utc::now();

        request
            .transition_to(ImportRequestStatus::Processing, now)
            .unwrap();
        assert_eq!(request.started_at, Some(now));

        request
            .transition_to(ImportRequestStatus::Completed, now)
            .unwrap();
        assert!(request.is_terminal());
        assert_eq!(request.completed_at, Some(now));

        let err = request
            .transition_to(ImportRequestStatus::Cancelled, now)
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition { .. }));
    }

    #[test]
    fn test_import_request_rejects_skipping_processing() {
        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        assert!(request
            .transition_to(ImportRequestStatus::Completed, Utc::now())
            .is_err());
        assert!(request
            .transition_to(ImportRequestStatus::Cancelled, Utc::now())
            .is_ok());
        assert!(request
            .transition_to(ImportRequestStatus::Processing, Utc::now())
            .is_err());
    }

    #[test]
    fn test_import_request_validation() {
        let request = ImportRequest::new("acme", "csv", "alice", 0);
        assert!(matches!(
            request.validate(),
            Err(OrchestratorError::ValidationError(_))
        ));

        let request = ImportRequest::new("acme", "  ", "alice", 3);
        assert!(request.validate().is_err());

        let request = ImportRequest::new("acme", "csv", "alice", 20);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_implicit_concurrent_import_requirement() {
        let mut request = ImportRequest::new("acme", "csv", "alice", 5);
        assert_eq!(request.requirement(resource_types::CONCURRENT_IMPORTS), 1);
        assert_eq!(request.requirement(resource_types::MEMORY), 0);

        request
            .resource_requirements
            .insert(resource_types::MEMORY.to_string(), 512);
        assert_eq!(request.requirement(resource_types::MEMORY), 512);
    }

    #[test]
    fn test_reservation_lifecycle() {
        let now = Utc::now();
        let mut reservation = ResourceReservation::new(
            Uuid::new_v4(),
            "acme",
            "cpu_slots",
            2,
            now,
            now + Duration::minutes(30),
        );
        assert!(reservation.is_holding());
        assert!(reservation.expire(now).is_err());

        reservation.activate().unwrap();
        assert!(reservation.activate().is_err());
        reservation.release().unwrap();
        assert!(!reservation.is_holding());
        assert!(reservation.release().is_err());
    }

    #[test]
    fn test_reservation_expiry_requires_elapsed_window() {
        let now = Utc::now();
        let mut reservation = ResourceReservation::new(
            Uuid::new_v4(),
            "acme",
            "cpu_slots",
            1,
            now - Duration::hours(2),
            now - Duration::hours(1),
        );
        reservation.expire(now).unwrap();
        assert_eq!(reservation.status, ReservationStatus::Expired);
    }

    #[test]
    fn test_reservation_overlap_is_half_open() {
        let now = Utc::now();
        let reservation = ResourceReservation::new(
            Uuid::new_v4(),
            "acme",
            "cpu_slots",
            1,
            now,
            now + Duration::minutes(10),
        );
        assert!(reservation.overlaps(now + Duration::minutes(5), now + Duration::minutes(20)));
        assert!(!reservation.overlaps(now + Duration::minutes(10), now + Duration::minutes(20)));
        assert!(!reservation.overlaps(now - Duration::minutes(10), now));
    }

    #[test]
    fn test_lock_expiry() {
        let now = Utc::now();
        let lock = ResourceLock {
            key: ResourceKey::new("table", "orders"),
            lock_type: LockType::Exclusive,
            holder_request_id: Uuid::new_v4(),
            acquired_at: now,
            expires_at: now + Duration::seconds(30),
        };
        assert!(!lock.is_expired(now));
        assert!(lock.is_expired(now + Duration::seconds(30)));
    }

    #[test]
    fn test_tenant_limit_validation() {
        let limit = TenantLimit::new("acme", "memory", 0, "MB", EnforcementLevel::Hard);
        assert!(limit.validate().is_err());
        let limit = TenantLimit::new("acme", "memory", 1024, "MB", EnforcementLevel::Soft);
        assert!(limit.validate().is_ok());
    }
}
