//! Test data builders for creating test entities
//!
//! Builders start from sensible defaults (tenant `acme`, import type `csv`)
//! so tests only spell out what they care about.

use chrono::{DateTime, Utc};
use orchestrator_domain::{ImportRequest, LockRequirement, Schedule, ScheduleStatus};
use uuid::Uuid;

/// Builder for creating test ImportRequest entities
pub struct ImportRequestBuilder {
    request: ImportRequest,
}

impl ImportRequestBuilder {
    pub fn new() -> Self {
        Self {
            request: ImportRequest::new("acme", "csv", "test-user", 10),
        }
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.request.tenant_id = tenant_id.to_string();
        self
    }

    pub fn with_import_type(mut self, import_type: &str) -> Self {
        self.request.import_type = import_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.request.priority = priority;
        self
    }

    pub fn with_requested_at(mut self, requested_at: DateTime<Utc>) -> Self {
        self.request.requested_at = requested_at;
        self
    }

    pub fn with_requirement(mut self, resource_type: &str, amount: u64) -> Self {
        self.request
            .resource_requirements
            .insert(resource_type.to_string(), amount);
        self
    }

    pub fn with_exclusive_lock(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.request
            .lock_requirements
            .push(LockRequirement::exclusive(resource_type, resource_id));
        self
    }

    pub fn with_shared_lock(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.request
            .lock_requirements
            .push(LockRequirement::shared(resource_type, resource_id));
        self
    }

    pub fn with_orchestration(mut self, orchestration_id: Uuid) -> Self {
        self.request.orchestration_id = Some(orchestration_id);
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.request.configuration = configuration;
        self
    }

    pub fn build(self) -> ImportRequest {
        self.request
    }
}

impl Default for ImportRequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Schedule entities
pub struct ScheduleBuilder {
    schedule: Schedule,
}

impl ScheduleBuilder {
    /// Hourly recurring schedule at minute zero
    pub fn new() -> Self {
        Self {
            schedule: Schedule::new("test_schedule", "acme", "csv", "0 0 * * * *", true, "test-user"),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.schedule.name = name.to_string();
        self
    }

    pub fn with_tenant(mut self, tenant_id: &str) -> Self {
        self.schedule.tenant_id = tenant_id.to_string();
        self
    }

    pub fn with_import_type(mut self, import_type: &str) -> Self {
        self.schedule.import_type = import_type.to_string();
        self
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.schedule.schedule_expression = expression.to_string();
        self
    }

    /// One-off schedule firing at `at`
    pub fn once_at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule.schedule_expression = at.to_rfc3339();
        self.schedule.recurring = false;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.schedule.priority = priority;
        self
    }

    pub fn with_requirement(mut self, resource_type: &str, amount: u64) -> Self {
        self.schedule
            .resource_requirements
            .insert(resource_type.to_string(), amount);
        self
    }

    pub fn with_exclusive_lock(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.schedule
            .lock_requirements
            .push(LockRequirement::exclusive(resource_type, resource_id));
        self
    }

    pub fn with_orchestration(mut self, orchestration_id: Uuid) -> Self {
        self.schedule.orchestration_id = Some(orchestration_id);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.schedule.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay_seconds(mut self, seconds: u64) -> Self {
        self.schedule.retry_delay_seconds = seconds;
        self
    }

    pub fn with_timeout_minutes(mut self, minutes: u64) -> Self {
        self.schedule.timeout_minutes = minutes;
        self
    }

    pub fn with_status(mut self, status: ScheduleStatus) -> Self {
        self.schedule.status = status;
        self
    }

    pub fn with_next_execution(mut self, next: DateTime<Utc>) -> Self {
        self.schedule.next_execution = Some(next);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.schedule.is_active = false;
        self
    }

    pub fn build(self) -> Schedule {
        self.schedule
    }
}

impl Default for ScheduleBuilder {
    fn default() -> Self {
        Self::new()
    }
}
