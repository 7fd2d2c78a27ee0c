//! 导入请求队列
//!
//! 排队中的请求按 (priority, requested_at, 入队序号) 排序，优先级数值越小越先出队。
//! 所有状态变更都在同一把互斥锁内完成，两个 worker 不会拿到同一个请求。
//! 终态请求保留在内存中以供查询。

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use orchestrator_domain::{
    AuditEventType, ImportOutcome, ImportRequest, ImportRequestStatus,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::observability::{MetricsCollector, StructuredLogger};
use crate::quota_enforcer::ResourceUsageSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: u8,
    requested_at: DateTime<Utc>,
    seq: u64,
    id: Uuid,
}

#[derive(Default)]
struct QueueState {
    requests: HashMap<Uuid, ImportRequest>,
    ordering: BTreeSet<QueueKey>,
    queue_keys: HashMap<Uuid, QueueKey>,
    tokens: HashMap<Uuid, CancellationToken>,
    next_seq: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

pub struct ImportQueueManager {
    state: Mutex<QueueState>,
    max_depth: usize,
    audit: AuditTrail,
    metrics: Arc<MetricsCollector>,
}

impl ImportQueueManager {
    /// `max_depth` 为 0 表示不限制排队数量
    pub fn new(max_depth: usize, audit: AuditTrail, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            max_depth,
            audit,
            metrics,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 校验失败时不修改任何状态
    pub fn enqueue(&self, mut request: ImportRequest) -> OrchestratorResult<Uuid> {
        request.validate()?;
        let id = request.id;

        let depth = {
            let mut state = self.lock_state();
            if state.requests.contains_key(&id) {
                return Err(OrchestratorError::validation_error(format!(
                    "导入请求 {id} 已存在"
                )));
            }
            if self.max_depth > 0 && state.ordering.len() >= self.max_depth {
                return Err(OrchestratorError::validation_error(format!(
                    "导入队列已满 (max_depth = {})",
                    self.max_depth
                )));
            }

            request.status = ImportRequestStatus::Queued;
            request.assigned_worker = None;
            request.started_at = None;
            request.completed_at = None;

            let key = QueueKey {
                priority: request.priority,
                requested_at: request.requested_at,
                seq: state.next_seq,
                id,
            };
            state.next_seq += 1;
            state.ordering.insert(key);
            state.queue_keys.insert(id, key);
            state.tokens.insert(id, CancellationToken::new());
            state.requests.insert(id, request.clone());
            state.ordering.len()
        };

        StructuredLogger::log_request_admitted(
            id,
            &request.tenant_id,
            &request.import_type,
            request.priority,
        );
        self.metrics.record_enqueued();
        self.metrics.update_queue_depth(depth);
        self.audit.record(
            AuditEventType::RequestQueued,
            id,
            serde_json::json!({
                "tenant_id": request.tenant_id,
                "import_type": request.import_type,
                "priority": request.priority,
                "schedule_id": request.schedule_id,
                "execution_id": request.execution_id,
            }),
        );
        Ok(id)
    }

    /// 取出优先级最高的请求并置为 PROCESSING；队列为空时返回 `None`
    pub fn dequeue_next(&self, worker_id: &str) -> OrchestratorResult<Option<ImportRequest>> {
        let now = Utc::now();
        let (request, depth) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(key) = state.ordering.pop_first() else {
                return Ok(None);
            };
            state.queue_keys.remove(&key.id);
            let request = state
                .requests
                .get_mut(&key.id)
                .ok_or(OrchestratorError::RequestNotFound { id: key.id })?;
            request.transition_to(ImportRequestStatus::Processing, now)?;
            request.assigned_worker = Some(worker_id.to_string());
            (request.clone(), state.ordering.len())
        };

        StructuredLogger::log_request_dequeued(
            request.id,
            worker_id,
            (now - request.requested_at).num_milliseconds(),
        );
        self.metrics.record_dequeued();
        self.metrics.update_queue_depth(depth);
        self.audit.record(
            AuditEventType::RequestDequeued,
            request.id,
            serde_json::json!({ "worker_id": worker_id }),
        );
        Ok(Some(request))
    }

    /// 记录执行结果；只接受 PROCESSING 状态的请求
    pub fn report_outcome(
        &self,
        request_id: Uuid,
        outcome: &ImportOutcome,
    ) -> OrchestratorResult<ImportRequest> {
        let now = Utc::now();
        let next = if outcome.success {
            ImportRequestStatus::Completed
        } else {
            ImportRequestStatus::Failed
        };

        let request = {
            let mut state = self.lock_state();
            let request = state
                .requests
                .get_mut(&request_id)
                .ok_or(OrchestratorError::RequestNotFound { id: request_id })?;
            request.transition_to(next, now)?;
            request.records_processed = outcome.records_processed;
            request.error_message = outcome.error_message.clone();
            let request = request.clone();
            state.tokens.remove(&request_id);
            request
        };

        let duration_ms = request.execution_duration_ms();
        StructuredLogger::log_request_finished(
            request_id,
            request.status.as_str(),
            request.records_processed,
            duration_ms,
            request.error_message.as_deref(),
        );
        self.metrics.record_request_finished(
            &request.import_type,
            request.status.as_str(),
            duration_ms.unwrap_or(0) as f64 / 1000.0,
        );
        let event_type = if outcome.success {
            AuditEventType::RequestCompleted
        } else {
            AuditEventType::RequestFailed
        };
        self.audit.record(
            event_type,
            request_id,
            serde_json::json!({
                "tenant_id": request.tenant_id,
                "records_processed": request.records_processed,
                "error": request.error_message,
                "error_kind": outcome.error_kind,
                "worker_id": request.assigned_worker,
            }),
        );
        Ok(request)
    }

    /// 取消排队中或执行中的请求，并触发其取消令牌
    pub fn cancel(&self, request_id: Uuid) -> OrchestratorResult<ImportRequest> {
        let now = Utc::now();
        let (request, depth) = {
            let mut state = self.lock_state();
            let request = state
                .requests
                .get_mut(&request_id)
                .ok_or(OrchestratorError::RequestNotFound { id: request_id })?;
            let previous = request.status;
            request.transition_to(ImportRequestStatus::Cancelled, now)?;
            let request = request.clone();
            if previous == ImportRequestStatus::Queued {
                if let Some(key) = state.queue_keys.remove(&request_id) {
                    state.ordering.remove(&key);
                }
            }
            if let Some(token) = state.tokens.remove(&request_id) {
                token.cancel();
            }
            (request, state.ordering.len())
        };

        debug!(request.id = %request_id, "导入请求已取消");
        self.metrics.update_queue_depth(depth);
        self.audit.record(
            AuditEventType::RequestCancelled,
            request_id,
            serde_json::json!({
                "tenant_id": request.tenant_id,
                "worker_id": request.assigned_worker,
            }),
        );
        Ok(request)
    }

    /// 在排队请求中的名次（从 1 开始），按需计算
    pub fn queue_position(&self, request_id: Uuid) -> Option<usize> {
        let state = self.lock_state();
        let key = state.queue_keys.get(&request_id)?;
        Some(state.ordering.range(..*key).count() + 1)
    }

    pub fn get(&self, request_id: Uuid) -> Option<ImportRequest> {
        self.lock_state().requests.get(&request_id).cloned()
    }

    pub fn cancellation_token(&self, request_id: Uuid) -> Option<CancellationToken> {
        self.lock_state().tokens.get(&request_id).cloned()
    }

    pub fn list_by_status(&self, status: ImportRequestStatus) -> Vec<ImportRequest> {
        let mut requests: Vec<ImportRequest> = self
            .lock_state()
            .requests
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        requests.sort_by_key(|r| (r.priority, r.requested_at));
        requests
    }

    pub fn list_by_tenant(&self, tenant_id: &str) -> Vec<ImportRequest> {
        let mut requests: Vec<ImportRequest> = self
            .lock_state()
            .requests
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        requests.sort_by_key(|r| r.requested_at);
        requests
    }

    pub fn queued_len(&self) -> usize {
        self.lock_state().ordering.len()
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock_state();
        let mut stats = QueueStats::default();
        for request in state.requests.values() {
            match request.status {
                ImportRequestStatus::Queued => stats.queued += 1,
                ImportRequestStatus::Processing => stats.processing += 1,
                ImportRequestStatus::Completed => stats.completed += 1,
                ImportRequestStatus::Failed => stats.failed += 1,
                ImportRequestStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }
}

impl ResourceUsageSource for ImportQueueManager {
    fn consumed(&self, tenant_id: &str, resource_type: &str) -> u64 {
        self.lock_state()
            .requests
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.status.is_active())
            .map(|r| r.requirement(resource_type))
            .sum()
    }
}
