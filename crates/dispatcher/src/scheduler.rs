//! 导入调度器
//!
//! 到期的调度经准入检查后生成导入请求入队，调度器自身从不执行导入。
//! 同一调度的所有变更由按调度划分的异步互斥锁串行化。

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use orchestrator_config::DispatcherConfig;
use orchestrator_domain::{
    AuditEventType, ExecutionHistory, ExecutionHistoryRepository, ExecutionStatus, ImportOutcome,
    ImportRequest, ImportStatusUpdate, OrchestrationState, Schedule, ScheduleFilter,
    ScheduleRepository, ScheduleStatus,
};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::StructuredLogger;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admission::{AdmissionController, CoordinationServices};
use crate::cron_utils::ScheduleExpression;
use crate::retry_policy::{RetryDecision, RetryPolicy};

/// 一次触发的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerOutcome {
    Enqueued {
        execution_id: Uuid,
        request_id: Uuid,
    },
    RetryScheduled {
        execution_id: Uuid,
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    Exhausted {
        execution_id: Uuid,
    },
    /// 调度在加锁后已不再到期
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub timed_out: usize,
    pub expired_reservations: usize,
    pub triggered: Vec<(Uuid, TriggerOutcome)>,
    pub errors: usize,
}

pub struct ImportScheduler {
    schedule_repo: Arc<dyn ScheduleRepository>,
    execution_repo: Arc<dyn ExecutionHistoryRepository>,
    services: CoordinationServices,
    admission: AdmissionController,
    config: DispatcherConfig,
    schedule_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl ImportScheduler {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        execution_repo: Arc<dyn ExecutionHistoryRepository>,
        services: CoordinationServices,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            schedule_repo,
            execution_repo,
            admission: AdmissionController::new(services.clone()),
            services,
            config,
            schedule_locks: DashMap::new(),
        }
    }

    /// 按配置的默认重试与超时参数构造调度
    pub fn new_schedule(
        &self,
        name: impl Into<String>,
        tenant_id: impl Into<String>,
        import_type: impl Into<String>,
        schedule_expression: impl Into<String>,
        recurring: bool,
        created_by: impl Into<String>,
    ) -> Schedule {
        let mut schedule = Schedule::new(
            name,
            tenant_id,
            import_type,
            schedule_expression,
            recurring,
            created_by,
        );
        schedule.max_retries = self.config.default_max_retries;
        schedule.retry_delay_seconds = self.config.default_retry_delay_seconds;
        schedule.timeout_minutes = self.config.default_timeout_minutes;
        schedule
    }

    fn schedule_lock(&self, schedule_id: Uuid) -> Arc<Mutex<()>> {
        self.schedule_locks
            .entry(schedule_id)
            .or_default()
            .value()
            .clone()
    }

    async fn load_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        self.schedule_repo
            .get_by_id(schedule_id)
            .await?
            .ok_or(OrchestratorError::ScheduleNotFound { id: schedule_id })
    }

    pub async fn get_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Option<Schedule>> {
        self.schedule_repo.get_by_id(schedule_id).await
    }

    pub async fn list_schedules(&self, filter: &ScheduleFilter) -> OrchestratorResult<Vec<Schedule>> {
        self.schedule_repo.list(filter).await
    }

    pub async fn execution_history(
        &self,
        schedule_id: Uuid,
    ) -> OrchestratorResult<Vec<ExecutionHistory>> {
        self.execution_repo.list_by_schedule(schedule_id).await
    }

    pub async fn create_schedule(&self, schedule: Schedule) -> OrchestratorResult<Schedule> {
        self.create_schedule_at(schedule, Utc::now()).await
    }

    /// 校验并登记调度，同时为首个执行窗口预订资源；预订冲突时拒绝创建
    pub async fn create_schedule_at(
        &self,
        mut schedule: Schedule,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Schedule> {
        schedule.validate()?;
        let expression = ScheduleExpression::parse(&schedule.schedule_expression)?;
        if schedule.recurring && expression.is_one_off() {
            return Err(OrchestratorError::InvalidSchedule {
                expr: schedule.schedule_expression.clone(),
                message: "一次性时间点不能用于循环调度".to_string(),
            });
        }
        let next = expression
            .next_after(now)
            .ok_or_else(|| OrchestratorError::InvalidSchedule {
                expr: schedule.schedule_expression.clone(),
                message: "没有未来的触发时间".to_string(),
            })?;

        schedule.status = ScheduleStatus::Scheduled;
        schedule.next_execution = Some(next);
        schedule.clear_execution_cursor();
        schedule.created_at = now;
        schedule.updated_at = now;

        let prebooked = self.prebook(&schedule, next)?;
        let created = match self.schedule_repo.create(&schedule).await {
            Ok(created) => created,
            Err(err) => {
                self.release_reservations(&prebooked);
                return Err(err);
            }
        };

        info!(
            schedule.id = %created.id,
            tenant.id = %created.tenant_id,
            next_execution = %next,
            recurring = created.recurring,
            "创建导入调度"
        );
        self.services.audit.record(
            AuditEventType::ScheduleCreated,
            created.id,
            serde_json::json!({
                "name": created.name,
                "tenant_id": created.tenant_id,
                "import_type": created.import_type,
                "schedule_expression": created.schedule_expression,
                "next_execution": next,
                "reservations": prebooked,
            }),
        );
        Ok(created)
    }

    /// 为 `[from, from + timeout)` 预订调度需要的全部资源，失败时回收已预订部分
    fn prebook(&self, schedule: &Schedule, from: DateTime<Utc>) -> OrchestratorResult<Vec<Uuid>> {
        let until = from + schedule.timeout();
        let mut booked = Vec::new();
        for (resource_type, amount) in &schedule.resource_requirements {
            if *amount == 0 {
                continue;
            }
            match self.services.reservations.reserve(
                schedule.id,
                &schedule.tenant_id,
                resource_type,
                *amount,
                from,
                until,
            ) {
                Ok(reservation) => booked.push(reservation.id),
                Err(err) => {
                    self.release_reservations(&booked);
                    return Err(err);
                }
            }
        }
        Ok(booked)
    }

    fn release_reservations(&self, ids: &[Uuid]) {
        for id in ids {
            if let Err(e) = self.services.reservations.release(*id) {
                warn!(reservation.id = %id, error = %e, "回收资源预留失败");
            }
        }
    }

    /// 释放旧预订并为新窗口重新预订；冲突只记日志，触发时会现场申请
    fn rebook_window(&self, schedule: &Schedule, next: DateTime<Utc>) {
        self.services.reservations.release_for_schedule(schedule.id);
        if !schedule.is_active {
            return;
        }
        if let Err(e) = self.prebook(schedule, next) {
            warn!(
                schedule.id = %schedule.id,
                next_execution = %next,
                error = %e,
                "预订下一执行窗口失败"
            );
        }
    }

    pub async fn evaluate_due(&self, now: DateTime<Utc>) -> OrchestratorResult<Vec<Schedule>> {
        self.schedule_repo.find_due(now).await
    }

    pub async fn trigger(&self, schedule_id: Uuid) -> OrchestratorResult<TriggerOutcome> {
        self.trigger_at(schedule_id, Utc::now()).await
    }

    pub async fn trigger_at(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TriggerOutcome> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        if !schedule.is_due(now) {
            debug!(schedule.id = %schedule_id, "调度已不再到期，跳过");
            return Ok(TriggerOutcome::Skipped);
        }
        self.log_missed_occurrences(&schedule, now);

        let mut history = self.pending_or_new_execution(&mut schedule, now).await?;
        let request = self.build_request(&schedule, history.id, now);
        let request_id = request.id;

        match self.admission.admit_scheduled(&schedule, request, now) {
            Ok(admitted) => {
                history.record_attempt(
                    now,
                    serde_json::json!({
                        "result": "admitted",
                        "request_id": request_id,
                        "reservations": admitted.reservation_ids,
                        "locks": schedule.lock_requirements,
                    }),
                );
                history.mark_in_progress()?;
                self.execution_repo.update(&history).await?;

                let scheduled_for = schedule.next_execution;
                schedule.status = ScheduleStatus::Executing;
                schedule.active_request_id = Some(request_id);
                schedule.updated_at = now;
                self.schedule_repo.update(&schedule).await?;

                self.services.metrics.record_schedule_fired();
                StructuredLogger::log_schedule_fired(
                    schedule.id,
                    history.id,
                    history.attempts,
                    scheduled_for,
                );
                self.services.audit.record(
                    AuditEventType::ScheduleFired,
                    schedule.id,
                    serde_json::json!({
                        "execution_id": history.id,
                        "request_id": request_id,
                        "attempt": history.attempts,
                        "tenant_id": schedule.tenant_id,
                    }),
                );
                Ok(TriggerOutcome::Enqueued {
                    execution_id: history.id,
                    request_id,
                })
            }
            Err(err) => {
                warn!(
                    schedule.id = %schedule.id,
                    execution.id = %history.id,
                    error_kind = err.error_kind(),
                    error = %err,
                    "调度准入被拒绝"
                );
                history.record_attempt(
                    now,
                    serde_json::json!({
                        "result": "blocked",
                        "error_kind": err.error_kind(),
                        "error": err.to_string(),
                    }),
                );
                history.error_message = Some(err.to_string());
                self.handle_failed_attempt(&mut schedule, history, &err.to_string(), now)
                    .await
            }
        }
    }

    fn log_missed_occurrences(&self, schedule: &Schedule, now: DateTime<Utc>) {
        let (Some(next), Ok(ScheduleExpression::Cron(cron))) = (
            schedule.next_execution,
            ScheduleExpression::parse(&schedule.schedule_expression),
        ) else {
            return;
        };
        if schedule.active_execution_id.is_some() {
            return;
        }
        let missed = cron.missed_occurrences(next, now, 1000);
        if missed > 0 {
            info!(
                schedule.id = %schedule.id,
                missed,
                scheduled_for = %next,
                "存在错过的触发时间，仅补触发一次"
            );
        }
    }

    async fn pending_or_new_execution(
        &self,
        schedule: &mut Schedule,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<ExecutionHistory> {
        if let Some(execution_id) = schedule.active_execution_id {
            match self.execution_repo.get_by_id(execution_id).await? {
                Some(history) if !history.is_sealed() => return Ok(history),
                _ => warn!(
                    schedule.id = %schedule.id,
                    execution.id = %execution_id,
                    "待重试的执行记录不可用，重新开始"
                ),
            }
        }

        let history = ExecutionHistory::new(schedule.id, now);
        self.execution_repo.create(&history).await?;
        schedule.active_execution_id = Some(history.id);
        schedule.active_request_id = None;
        schedule.current_attempt = 0;
        Ok(history)
    }

    fn build_request(&self, schedule: &Schedule, execution_id: Uuid, now: DateTime<Utc>) -> ImportRequest {
        let mut request = ImportRequest::new(
            schedule.tenant_id.clone(),
            schedule.import_type.clone(),
            schedule.created_by.clone(),
            schedule.priority,
        );
        request.orchestration_id = schedule.orchestration_id;
        request.schedule_id = Some(schedule.id);
        request.execution_id = Some(execution_id);
        request.requested_at = now;
        request.estimated_duration_seconds = schedule.timeout_seconds();
        request.resource_requirements = schedule.resource_requirements.clone();
        request.lock_requirements = schedule.lock_requirements.clone();
        request.configuration = schedule.import_configuration.clone();
        request
    }

    /// 失败的尝试：还有重试次数则按固定间隔重排，否则封存执行记录并推进调度
    async fn handle_failed_attempt(
        &self,
        schedule: &mut Schedule,
        mut history: ExecutionHistory,
        reason: &str,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<TriggerOutcome> {
        let policy = RetryPolicy::for_schedule(schedule);
        match policy.decide(schedule.current_attempt, now) {
            RetryDecision::Retry { attempt, retry_at } => {
                schedule.current_attempt = attempt;
                schedule.status = ScheduleStatus::Scheduled;
                schedule.next_execution = Some(retry_at);
                schedule.active_request_id = None;
                schedule.updated_at = now;
                self.execution_repo.update(&history).await?;
                self.schedule_repo.update(schedule).await?;

                self.services.metrics.record_schedule_retry();
                StructuredLogger::log_schedule_retry(
                    schedule.id,
                    attempt,
                    schedule.max_retries,
                    retry_at,
                    reason,
                );
                self.services.audit.record(
                    AuditEventType::ScheduleRetryScheduled,
                    schedule.id,
                    serde_json::json!({
                        "execution_id": history.id,
                        "attempt": attempt,
                        "max_retries": schedule.max_retries,
                        "retry_at": retry_at,
                        "reason": reason,
                    }),
                );
                Ok(TriggerOutcome::RetryScheduled {
                    execution_id: history.id,
                    attempt,
                    retry_at,
                })
            }
            RetryDecision::Exhausted { retries } => {
                history.seal(
                    ExecutionStatus::Failed,
                    now,
                    0,
                    Some(reason.to_string()),
                )?;
                self.execution_repo.update(&history).await?;

                schedule.record_outcome(false, now);
                self.services.reservations.release_for_schedule(schedule.id);
                self.finish_orchestration(schedule, OrchestrationState::Failed);
                self.advance(schedule, ScheduleStatus::Failed, now);
                self.schedule_repo.update(schedule).await?;

                self.services.metrics.record_schedule_exhausted();
                StructuredLogger::log_schedule_exhausted(
                    schedule.id,
                    history.id,
                    history.attempts,
                    reason,
                );
                self.services.audit.record(
                    AuditEventType::ScheduleRetriesExhausted,
                    schedule.id,
                    serde_json::json!({
                        "execution_id": history.id,
                        "attempts": history.attempts,
                        "retries": retries,
                        "tenant_id": schedule.tenant_id,
                        "locks": schedule.lock_requirements,
                        "resources": schedule.resource_requirements,
                        "reason": reason,
                        "next_execution": schedule.next_execution,
                    }),
                );
                self.services.audit.record(
                    AuditEventType::ExecutionFailed,
                    history.id,
                    serde_json::json!({
                        "schedule_id": schedule.id,
                        "attempts": history.attempts,
                        "error": reason,
                    }),
                );
                Ok(TriggerOutcome::Exhausted {
                    execution_id: history.id,
                })
            }
        }
    }

    /// 循环调度从 `now` 起计算下一次触发（错过的触发不补），一次性调度进入终态
    fn advance(&self, schedule: &mut Schedule, terminal: ScheduleStatus, now: DateTime<Utc>) {
        schedule.updated_at = now;
        if !schedule.recurring {
            schedule.status = terminal;
            schedule.next_execution = None;
            return;
        }

        let next = ScheduleExpression::parse(&schedule.schedule_expression)
            .ok()
            .and_then(|expression| expression.next_after(now));
        match next {
            Some(next) => {
                schedule.status = ScheduleStatus::Scheduled;
                schedule.next_execution = Some(next);
                self.rebook_window(schedule, next);
            }
            None => {
                warn!(schedule.id = %schedule.id, "循环调度没有后续触发时间");
                schedule.status = terminal;
                schedule.next_execution = None;
            }
        }
    }

    fn finish_orchestration(&self, schedule: &Schedule, state: OrchestrationState) {
        if let Some(orchestration_id) = schedule.orchestration_id {
            self.services
                .dependency_graph
                .set_state(orchestration_id, state);
            self.services
                .dependency_graph
                .mark_resources_released(orchestration_id);
        }
    }

    pub async fn complete_execution(
        &self,
        execution_id: Uuid,
        outcome: &ImportOutcome,
    ) -> OrchestratorResult<()> {
        self.finish_execution(execution_id, None, outcome, Utc::now())
            .await
    }

    pub async fn complete_execution_at(
        &self,
        execution_id: Uuid,
        outcome: &ImportOutcome,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        self.finish_execution(execution_id, None, outcome, now).await
    }

    /// worker 上报的结果；请求已不是调度当前的请求时忽略
    pub async fn complete_request(&self, update: &ImportStatusUpdate) -> OrchestratorResult<()> {
        let Some(execution_id) = update.execution_id else {
            return Ok(());
        };
        self.finish_execution(
            execution_id,
            Some(update.request_id),
            &update.outcome,
            update.timestamp,
        )
        .await
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        expected_request: Option<Uuid>,
        outcome: &ImportOutcome,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<()> {
        let schedule_id = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound { id: execution_id })?
            .schedule_id;

        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut history = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound { id: execution_id })?;
        if history.is_sealed() {
            debug!(execution.id = %execution_id, "执行记录已封存，忽略迟到的结果");
            return Ok(());
        }
        let mut schedule = self.load_schedule(schedule_id).await?;
        let current_request = match schedule.active_request_id {
            Some(request_id) if schedule.active_execution_id == Some(execution_id) => request_id,
            _ => {
                debug!(execution.id = %execution_id, "执行当前没有进行中的请求，忽略结果");
                return Ok(());
            }
        };
        if expected_request.map_or(false, |expected| expected != current_request) {
            debug!(
                execution.id = %execution_id,
                request.id = ?expected_request,
                "结果来自已被替换的请求，忽略"
            );
            return Ok(());
        }

        self.services.locks.release_all(current_request);
        self.services.reservations.release_for_schedule(schedule.id);

        if outcome.success {
            history.seal(
                ExecutionStatus::Completed,
                now,
                outcome.records_processed,
                None,
            )?;
            self.execution_repo.update(&history).await?;
            schedule.record_outcome(true, now);
            self.finish_orchestration(&schedule, OrchestrationState::Succeeded);
            self.advance(&mut schedule, ScheduleStatus::Completed, now);
            self.schedule_repo.update(&schedule).await?;

            info!(
                schedule.id = %schedule.id,
                execution.id = %execution_id,
                records = outcome.records_processed,
                "调度执行成功"
            );
            self.services.audit.record(
                AuditEventType::ExecutionCompleted,
                execution_id,
                serde_json::json!({
                    "schedule_id": schedule.id,
                    "request_id": current_request,
                    "records_processed": outcome.records_processed,
                    "attempts": history.attempts,
                }),
            );
            return Ok(());
        }

        let reason = outcome
            .error_message
            .clone()
            .unwrap_or_else(|| "导入执行失败".to_string());

        if outcome.is_cancelled() {
            history.seal(
                ExecutionStatus::Cancelled,
                now,
                outcome.records_processed,
                Some(reason.clone()),
            )?;
            self.execution_repo.update(&history).await?;
            schedule.record_outcome(false, now);
            self.finish_orchestration(&schedule, OrchestrationState::Cancelled);
            self.advance(&mut schedule, ScheduleStatus::Cancelled, now);
            self.schedule_repo.update(&schedule).await?;
            info!(schedule.id = %schedule.id, execution.id = %execution_id, "调度执行已取消");
            self.services.audit.record(
                AuditEventType::ExecutionFailed,
                execution_id,
                serde_json::json!({
                    "schedule_id": schedule.id,
                    "request_id": current_request,
                    "cancelled": true,
                    "reason": reason,
                }),
            );
            return Ok(());
        }

        history.error_message = Some(reason.clone());
        if let Some(details) = history.execution_details.as_object_mut() {
            details.insert(
                "last_error".to_string(),
                serde_json::json!({
                    "request_id": current_request,
                    "error_kind": outcome.error_kind,
                    "error": reason,
                    "at": now,
                }),
            );
        }
        schedule.active_request_id = None;
        self.handle_failed_attempt(&mut schedule, history, &reason, now)
            .await
            .map(|_| ())
    }

    pub async fn check_timeouts(&self, now: DateTime<Utc>) -> OrchestratorResult<usize> {
        let executing = self
            .schedule_repo
            .find_by_status(ScheduleStatus::Executing)
            .await?;

        let mut timed_out = 0;
        for schedule in executing {
            let Some(request_id) = schedule.active_request_id else {
                continue;
            };
            let started = self
                .services
                .queue
                .get(request_id)
                .map(|r| r.started_at.unwrap_or(r.requested_at))
                .unwrap_or(schedule.updated_at);
            if now - started < schedule.timeout() {
                continue;
            }
            match self.force_timeout(schedule.id, request_id, now).await {
                Ok(true) => timed_out += 1,
                Ok(false) => {}
                Err(e) => error!(schedule.id = %schedule.id, error = %e, "处理执行超时失败"),
            }
        }
        Ok(timed_out)
    }

    async fn force_timeout(
        &self,
        schedule_id: Uuid,
        request_id: Uuid,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<bool> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        if schedule.status != ScheduleStatus::Executing
            || schedule.active_request_id != Some(request_id)
        {
            return Ok(false);
        }
        let Some(execution_id) = schedule.active_execution_id else {
            return Ok(false);
        };
        let mut history = self
            .execution_repo
            .get_by_id(execution_id)
            .await?
            .ok_or(OrchestratorError::ExecutionNotFound { id: execution_id })?;

        if let Err(e) = self.services.queue.cancel(request_id) {
            debug!(request.id = %request_id, error = %e, "超时取消请求时请求已结束");
        }
        let released_locks = self.services.locks.release_all(request_id);
        self.services.reservations.release_for_schedule(schedule.id);

        let err = OrchestratorError::timeout_error(format!(
            "调度 {} 的执行 {} 超过 {} 分钟",
            schedule.id, execution_id, schedule.timeout_minutes
        ));
        self.services.metrics.record_execution_timeout();
        StructuredLogger::log_execution_timeout(schedule.id, execution_id, schedule.timeout_minutes);
        self.services.audit.record(
            AuditEventType::ExecutionTimedOut,
            execution_id,
            serde_json::json!({
                "schedule_id": schedule.id,
                "request_id": request_id,
                "tenant_id": schedule.tenant_id,
                "locks": schedule.lock_requirements,
                "released_locks": released_locks,
                "attempts": history.attempts,
            }),
        );

        history.error_message = Some(err.to_string());
        schedule.active_request_id = None;
        self.handle_failed_attempt(&mut schedule, history, &err.to_string(), now)
            .await?;
        Ok(true)
    }

    pub async fn pause_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        if schedule.status != ScheduleStatus::Scheduled {
            return Err(invalid_transition(&schedule, ScheduleStatus::Paused));
        }
        schedule.status = ScheduleStatus::Paused;
        schedule.updated_at = Utc::now();
        self.services.reservations.release_for_schedule(schedule.id);
        self.schedule_repo.update(&schedule).await?;

        info!(schedule.id = %schedule_id, "调度已暂停");
        self.services.audit.record(
            AuditEventType::SchedulePaused,
            schedule_id,
            serde_json::json!({ "pending_execution": schedule.active_execution_id }),
        );
        Ok(schedule)
    }

    pub async fn resume_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        self.resume_schedule_at(schedule_id, Utc::now()).await
    }

    /// 恢复时重新计算一个未来的触发时间；待重试的执行继续沿用重试间隔
    pub async fn resume_schedule_at(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> OrchestratorResult<Schedule> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        if schedule.status != ScheduleStatus::Paused {
            return Err(invalid_transition(&schedule, ScheduleStatus::Scheduled));
        }

        let next = if schedule.active_execution_id.is_some() {
            schedule
                .next_execution
                .filter(|at| *at > now)
                .unwrap_or(now + schedule.retry_delay())
        } else {
            match ScheduleExpression::parse(&schedule.schedule_expression)? {
                ScheduleExpression::Once(at) if at <= now => now + Duration::seconds(1),
                expression => expression.next_after(now).ok_or_else(|| {
                    OrchestratorError::InvalidSchedule {
                        expr: schedule.schedule_expression.clone(),
                        message: "没有未来的触发时间".to_string(),
                    }
                })?,
            }
        };

        schedule.status = ScheduleStatus::Scheduled;
        schedule.next_execution = Some(next);
        schedule.updated_at = now;
        self.rebook_window(&schedule, next);
        self.schedule_repo.update(&schedule).await?;

        info!(schedule.id = %schedule_id, next_execution = %next, "调度已恢复");
        self.services.audit.record(
            AuditEventType::ScheduleResumed,
            schedule_id,
            serde_json::json!({ "next_execution": next }),
        );
        Ok(schedule)
    }

    /// 取消调度；执行中的请求会被取消并释放其锁与预留
    pub async fn cancel_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        if schedule.status.is_final() {
            return Err(invalid_transition(&schedule, ScheduleStatus::Cancelled));
        }
        let now = Utc::now();

        if let Some(request_id) = schedule.active_request_id {
            if let Err(e) = self.services.queue.cancel(request_id) {
                debug!(request.id = %request_id, error = %e, "取消调度时请求已结束");
            }
            self.services.locks.release_all(request_id);
        }
        if let Some(execution_id) = schedule.active_execution_id {
            if let Some(mut history) = self.execution_repo.get_by_id(execution_id).await? {
                if !history.is_sealed() {
                    history.seal(
                        ExecutionStatus::Cancelled,
                        now,
                        0,
                        Some("调度已取消".to_string()),
                    )?;
                    self.execution_repo.update(&history).await?;
                }
            }
        }
        self.services.reservations.release_for_schedule(schedule.id);
        self.finish_orchestration(&schedule, OrchestrationState::Cancelled);

        schedule.clear_execution_cursor();
        schedule.status = ScheduleStatus::Cancelled;
        schedule.next_execution = None;
        schedule.updated_at = now;
        self.schedule_repo.update(&schedule).await?;

        info!(schedule.id = %schedule_id, "调度已取消");
        self.services.audit.record(
            AuditEventType::ScheduleCancelled,
            schedule_id,
            serde_json::json!({ "tenant_id": schedule.tenant_id }),
        );
        Ok(schedule)
    }

    /// 软停用：调度保留，但不再被触发
    pub async fn deactivate_schedule(&self, schedule_id: Uuid) -> OrchestratorResult<Schedule> {
        let lock = self.schedule_lock(schedule_id);
        let _guard = lock.lock().await;

        let mut schedule = self.load_schedule(schedule_id).await?;
        schedule.is_active = false;
        schedule.updated_at = Utc::now();
        if schedule.status != ScheduleStatus::Executing {
            self.services.reservations.release_for_schedule(schedule.id);
        }
        self.schedule_repo.update(&schedule).await?;

        info!(schedule.id = %schedule_id, "调度已停用");
        self.services.audit.record(
            AuditEventType::ScheduleDeactivated,
            schedule_id,
            serde_json::json!({ "status": schedule.status }),
        );
        Ok(schedule)
    }

    /// 一轮调度：超时检查、过期预留清理、触发全部到期调度
    pub async fn tick(&self, now: DateTime<Utc>) -> OrchestratorResult<TickReport> {
        let started = Instant::now();
        let mut report = TickReport {
            timed_out: self.check_timeouts(now).await?,
            expired_reservations: self.services.reservations.expire_overdue(now),
            ..Default::default()
        };

        for schedule in self.evaluate_due(now).await? {
            match self.trigger_at(schedule.id, now).await {
                Ok(outcome) => report.triggered.push((schedule.id, outcome)),
                Err(e) => {
                    report.errors += 1;
                    error!(schedule.id = %schedule.id, error = %e, "触发调度失败");
                }
            }
        }

        self.services
            .metrics
            .record_tick_duration(started.elapsed().as_secs_f64());
        if !report.triggered.is_empty() || report.timed_out > 0 {
            debug!(
                triggered = report.triggered.len(),
                timed_out = report.timed_out,
                expired_reservations = report.expired_reservations,
                "调度轮次完成"
            );
        }
        Ok(report)
    }

    /// 周期性执行 `tick`，直到收到关闭信号
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = std::time::Duration::from_secs(self.config.tick_interval_seconds.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tick_interval_seconds = period.as_secs(), "调度循环启动");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "调度轮次失败");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("调度循环退出");
                    break;
                }
            }
        }
    }
}

fn invalid_transition(schedule: &Schedule, to: ScheduleStatus) -> OrchestratorError {
    OrchestratorError::InvalidTransition {
        entity: "Schedule",
        id: schedule.id,
        from: schedule.status.to_string(),
        to: to.to_string(),
    }
}
