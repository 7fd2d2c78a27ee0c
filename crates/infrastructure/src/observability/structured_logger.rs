//! 编排事件的结构化日志

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_request_admitted(request_id: Uuid, tenant_id: &str, import_type: &str, priority: u8) {
        info!(
            event = "request_admitted",
            request.id = %request_id,
            tenant.id = tenant_id,
            request.import_type = import_type,
            request.priority = priority,
            "Import request admitted to queue"
        );
    }

    pub fn log_request_dequeued(request_id: Uuid, worker_id: &str, waited_ms: i64) {
        info!(
            event = "request_dequeued",
            request.id = %request_id,
            worker.id = worker_id,
            request.waited_ms = waited_ms,
            "Import request dequeued"
        );
    }

    pub fn log_request_finished(
        request_id: Uuid,
        status: &str,
        records_processed: u64,
        duration_ms: Option<i64>,
        error: Option<&str>,
    ) {
        if let Some(error) = error {
            warn!(
                event = "request_finished",
                request.id = %request_id,
                request.status = status,
                request.duration_ms = ?duration_ms,
                error.message = error,
                "Import request failed"
            );
        } else {
            info!(
                event = "request_finished",
                request.id = %request_id,
                request.status = status,
                request.records_processed = records_processed,
                request.duration_ms = ?duration_ms,
                "Import request finished"
            );
        }
    }

    pub fn log_lock_conflict(resource: &str, requested_by: Uuid, held_by: Uuid, held_as: &str) {
        warn!(
            event = "lock_conflict",
            lock.resource = resource,
            lock.requested_by = %requested_by,
            lock.held_by = %held_by,
            lock.held_as = held_as,
            "Resource lock conflict"
        );
    }

    pub fn log_quota_denied(tenant_id: &str, resource_type: &str, requested: u64, consumed: u64, limit: u64) {
        warn!(
            event = "quota_denied",
            tenant.id = tenant_id,
            quota.resource_type = resource_type,
            quota.requested = requested,
            quota.consumed = consumed,
            quota.limit = limit,
            "Tenant quota exceeded"
        );
    }

    pub fn log_schedule_fired(schedule_id: Uuid, execution_id: Uuid, attempt: u32, scheduled_for: Option<DateTime<Utc>>) {
        info!(
            event = "schedule_fired",
            schedule.id = %schedule_id,
            execution.id = %execution_id,
            execution.attempt = attempt,
            schedule.scheduled_for = ?scheduled_for,
            "Schedule fired"
        );
    }

    pub fn log_schedule_retry(schedule_id: Uuid, attempt: u32, max_retries: u32, retry_at: DateTime<Utc>, reason: &str) {
        warn!(
            event = "schedule_retry",
            schedule.id = %schedule_id,
            execution.attempt = attempt,
            schedule.max_retries = max_retries,
            schedule.retry_at = %retry_at,
            reason = reason,
            "Schedule execution will be retried"
        );
    }

    pub fn log_schedule_exhausted(schedule_id: Uuid, execution_id: Uuid, attempts: u32, reason: &str) {
        error!(
            event = "schedule_exhausted",
            schedule.id = %schedule_id,
            execution.id = %execution_id,
            execution.attempts = attempts,
            reason = reason,
            "Schedule execution failed after exhausting retries"
        );
    }

    pub fn log_execution_timeout(schedule_id: Uuid, execution_id: Uuid, timeout_minutes: u64) {
        error!(
            event = "execution_timeout",
            schedule.id = %schedule_id,
            execution.id = %execution_id,
            schedule.timeout_minutes = timeout_minutes,
            "Scheduled execution timed out"
        );
    }
}
