//! 导入 worker 池
//!
//! 每个 worker 循环地从队列取请求：先按键顺序获取全部资源锁（冲突时指数退避，
//! 最多等待 `lock_wait_seconds`），再在取消令牌、超时和执行结果三者之间
//! `select!`。结果写回队列后释放锁，并通过状态通道通知调度端。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orchestrator_config::WorkerConfig;
use orchestrator_domain::{ImportOutcome, ImportRequest, ImportRequestStatus, ImportStatusUpdate};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::{ImportQueueManager, ResourceLockManager};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;
use crate::executor_registry::ExecutorRegistry;

pub struct ImportWorkerPool {
    config: WorkerConfig,
    queue: Arc<ImportQueueManager>,
    locks: Arc<ResourceLockManager>,
    executors: Arc<ExecutorRegistry>,
    updates: mpsc::Sender<ImportStatusUpdate>,
    backoff: BackoffPolicy,
    hostname: String,
    /// 正在执行的请求数
    active: AtomicUsize,
}

impl ImportWorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<ImportQueueManager>,
        locks: Arc<ResourceLockManager>,
        executors: ExecutorRegistry,
        updates: mpsc::Sender<ImportStatusUpdate>,
    ) -> Self {
        let hostname = hostname::get()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            config,
            queue,
            locks,
            executors: Arc::new(executors),
            updates,
            backoff: BackoffPolicy::default(),
            hostname,
            active: AtomicUsize::new(0),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn worker_id(&self, index: usize) -> String {
        format!("{}-{}-{}", self.hostname, self.config.worker_id, index)
    }

    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// 启动 `concurrency` 个 worker，收到关闭信号后等待它们处理完手头的请求
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let concurrency = self.config.concurrency.max(1);
        info!(concurrency, executors = ?self.executors.names(), "worker 池启动");

        let mut workers = JoinSet::new();
        for index in 0..concurrency {
            let pool = Arc::clone(&self);
            let shutdown = shutdown.clone();
            let worker_id = self.worker_id(index);
            workers.spawn(async move { pool.worker_loop(worker_id, shutdown).await });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker 任务异常退出");
            }
        }
        info!("worker 池已停止");
    }

    async fn worker_loop(&self, worker_id: String, shutdown: CancellationToken) {
        debug!(worker.id = %worker_id, "worker 启动");
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms.max(1));

        while !shutdown.is_cancelled() {
            match self.process_next(&worker_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker.id = %worker_id, error = %e, "取请求失败"),
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }
        debug!(worker.id = %worker_id, "worker 退出");
    }

    /// 处理队列中的下一个请求；队列为空时返回 `None`
    pub async fn process_next(
        &self,
        worker_id: &str,
    ) -> OrchestratorResult<Option<ImportStatusUpdate>> {
        let Some(request) = self.queue.dequeue_next(worker_id)? else {
            return Ok(None);
        };
        Ok(Some(self.execute_request(worker_id, request).await))
    }

    /// 执行一个已出队的请求，返回发布给调度端的状态更新
    pub async fn execute_request(
        &self,
        worker_id: &str,
        request: ImportRequest,
    ) -> ImportStatusUpdate {
        self.active.fetch_add(1, Ordering::SeqCst);
        let token = self
            .queue
            .cancellation_token(request.id)
            .unwrap_or_default();

        let outcome = match self.acquire_locks(&request, &token).await {
            Ok(()) => self.run_executor(&request, &token).await,
            Err(_) if token.is_cancelled() => ImportOutcome::cancelled("等待资源锁时请求被取消"),
            Err(err) => {
                warn!(
                    request.id = %request.id,
                    worker.id = worker_id,
                    error = %err,
                    "资源锁等待超时"
                );
                ImportOutcome::from_error(&err)
            }
        };

        let (status, outcome) = self.record_outcome(&request, outcome);
        let released = self.locks.release_all(request.id);
        self.active.fetch_sub(1, Ordering::SeqCst);

        info!(
            request.id = %request.id,
            worker.id = worker_id,
            status = %status,
            records = outcome.records_processed,
            released_locks = released,
            "请求处理结束"
        );

        let update = ImportStatusUpdate {
            request_id: request.id,
            schedule_id: request.schedule_id,
            execution_id: request.execution_id,
            worker_id: worker_id.to_string(),
            status,
            outcome,
            timestamp: Utc::now(),
        };
        if self.updates.send(update.clone()).await.is_err() {
            warn!(request.id = %request.id, "状态通道已关闭，更新未送达");
        }
        update
    }

    /// 按键顺序获取全部锁，所有 worker 使用同一顺序
    async fn acquire_locks(
        &self,
        request: &ImportRequest,
        cancel: &CancellationToken,
    ) -> OrchestratorResult<()> {
        let ttl = chrono::Duration::seconds(self.config.lock_ttl_seconds as i64);
        let deadline = Instant::now() + Duration::from_secs(self.config.lock_wait_seconds);

        let mut requirements = request.lock_requirements.clone();
        requirements.sort_by(|a, b| a.key.cmp(&b.key));

        for requirement in &requirements {
            let mut attempt = 0;
            loop {
                match self
                    .locks
                    .acquire(&requirement.key, requirement.lock_type, request.id, ttl)
                {
                    Ok(_) => break,
                    Err(err @ OrchestratorError::LockConflict { .. }) => {
                        let delay = self.backoff.delay_for(attempt);
                        if Instant::now() + delay > deadline {
                            return Err(err);
                        }
                        attempt += 1;
                        debug!(
                            request.id = %request.id,
                            lock.resource = %requirement.key,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "资源锁冲突，退避后重试"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => return Err(err),
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    /// 调度请求的超时由调度写入 `estimated_duration_seconds`
    fn execution_timeout(&self, request: &ImportRequest) -> Duration {
        let seconds = if request.schedule_id.is_some() && request.estimated_duration_seconds > 0 {
            request.estimated_duration_seconds
        } else {
            self.config.execution_timeout_seconds
        };
        Duration::from_secs(seconds.max(1))
    }

    async fn run_executor(&self, request: &ImportRequest, token: &CancellationToken) -> ImportOutcome {
        let Some(executor) = self.executors.find(&request.import_type) else {
            let err = OrchestratorError::ExecutorNotFound(request.import_type.clone());
            error!(request.id = %request.id, error = %err, "找不到执行器");
            return ImportOutcome::from_error(&err);
        };

        let timeout = self.execution_timeout(request);
        let ttl = chrono::Duration::seconds(self.config.lock_ttl_seconds as i64);
        let mut renew = tokio::time::interval(Duration::from_secs(
            (self.config.lock_ttl_seconds / 3).max(1),
        ));
        renew.tick().await;

        let execution = executor.execute(request, token.clone());
        tokio::pin!(execution);
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                result = &mut execution => {
                    return match result {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(request.id = %request.id, executor = executor.name(), error = %e, "执行器返回错误");
                            ImportOutcome::from_error(&e)
                        }
                    };
                }
                _ = &mut deadline => {
                    token.cancel();
                    let err = OrchestratorError::timeout_error(format!(
                        "请求 {} 执行超过 {}s",
                        request.id,
                        timeout.as_secs()
                    ));
                    error!(request.id = %request.id, error = %err, "执行超时");
                    return ImportOutcome::from_error(&err);
                }
                _ = token.cancelled() => {
                    info!(request.id = %request.id, "执行中的请求被取消");
                    return ImportOutcome::cancelled("执行中被取消");
                }
                _ = renew.tick() => self.renew_locks(request, ttl),
            }
        }
    }

    fn renew_locks(&self, request: &ImportRequest, ttl: chrono::Duration) {
        for requirement in &request.lock_requirements {
            if let Err(e) = self.locks.renew(&requirement.key, request.id, ttl) {
                warn!(request.id = %request.id, lock.resource = %requirement.key, error = %e, "续租资源锁失败");
            }
        }
    }

    /// 写回队列；已被取消的请求不再上报结果
    fn record_outcome(
        &self,
        request: &ImportRequest,
        outcome: ImportOutcome,
    ) -> (ImportRequestStatus, ImportOutcome) {
        let current = self.queue.get(request.id).map(|r| r.status);
        if current == Some(ImportRequestStatus::Cancelled) {
            let outcome = if outcome.is_cancelled() {
                outcome
            } else {
                ImportOutcome::cancelled("请求已被取消")
            };
            return (ImportRequestStatus::Cancelled, outcome);
        }
        if outcome.is_cancelled() {
            if let Err(e) = self.queue.cancel(request.id) {
                warn!(request.id = %request.id, error = %e, "标记请求取消失败");
            }
            return (ImportRequestStatus::Cancelled, outcome);
        }

        match self.queue.report_outcome(request.id, &outcome) {
            Ok(finished) => (finished.status, outcome),
            Err(e) => {
                warn!(request.id = %request.id, error = %e, "回写执行结果失败");
                let status = self
                    .queue
                    .get(request.id)
                    .map(|r| r.status)
                    .filter(|status| status.is_terminal())
                    .unwrap_or(ImportRequestStatus::Failed);
                (status, outcome)
            }
        }
    }
}
