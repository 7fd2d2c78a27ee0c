use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use orchestrator_application::ImportOrchestrator;
use orchestrator_config::AppConfig;
use orchestrator_dispatcher::{CoordinationServices, ImportScheduler, StateListener};
use orchestrator_domain::{
    AuditEvent, AuditSink, ExecutionHistoryRepository, ImportExecutor, ScheduleRepository,
};
use orchestrator_infrastructure::{
    connect_sqlite, run_migrations, spawn_audit_consumer, AuditTrail, ChannelAuditSink,
    InMemoryAuditSink, InMemoryExecutionHistoryRepository, InMemoryScheduleRepository,
    MetricsCollector, SqliteExecutionHistoryRepository, SqliteScheduleRepository,
    TracingAuditSink,
};
use orchestrator_worker::{ExecutorRegistry, ImportWorkerPool, SimulatedImportExecutor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// worker 到状态监听器的通道容量
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// 审计通道及其下游，`run` 启动时交给后台消费者
type PendingAuditConsumer = (mpsc::UnboundedReceiver<AuditEvent>, Arc<dyn AuditSink>);

/// 主应用程序
///
/// 负责装配各协调组件，并在 `run` 中启动调度循环、锁清扫、
/// 状态监听器和 worker 池。
pub struct Application {
    config: AppConfig,
    services: CoordinationServices,
    scheduler: Arc<ImportScheduler>,
    orchestrator: Arc<ImportOrchestrator>,
    executors: Vec<Arc<dyn ImportExecutor>>,
    memory_audit: Option<Arc<InMemoryAuditSink>>,
    audit_consumer: Mutex<Option<PendingAuditConsumer>>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!(
            persistent = config.database.is_persistent(),
            audit_sink = %config.observability.audit_sink,
            "初始化应用程序"
        );

        let (schedule_repo, execution_repo) = create_repositories(&config).await?;

        let mut memory_audit = None;
        let mut audit_consumer = None;
        let audit = match config.observability.audit_sink.as_str() {
            "memory" => {
                let sink = Arc::new(InMemoryAuditSink::new());
                memory_audit = Some(sink.clone());
                AuditTrail::new(sink)
            }
            "channel" => {
                let (sink, rx) = ChannelAuditSink::new();
                let downstream: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
                audit_consumer = Some((rx, downstream));
                AuditTrail::new(Arc::new(sink))
            }
            _ => AuditTrail::tracing(),
        };

        let metrics = Arc::new(MetricsCollector::new());
        let services = CoordinationServices::from_config(&config, audit, metrics)
            .context("创建协调组件失败")?;

        let scheduler = Arc::new(ImportScheduler::new(
            schedule_repo,
            execution_repo,
            services.clone(),
            config.dispatcher.clone(),
        ));
        let orchestrator = Arc::new(ImportOrchestrator::new(
            Arc::clone(&scheduler),
            services.clone(),
        ));

        Ok(Self {
            config,
            services,
            scheduler,
            orchestrator,
            executors: vec![Arc::new(SimulatedImportExecutor::new("simulated", Vec::new()))],
            memory_audit,
            audit_consumer: Mutex::new(audit_consumer),
        })
    }

    /// 替换默认的模拟执行器，必须在 `run` 之前调用
    pub fn with_executors(mut self, executors: Vec<Arc<dyn ImportExecutor>>) -> Self {
        self.executors = executors;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> Arc<ImportOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn services(&self) -> &CoordinationServices {
        &self.services
    }

    /// `audit_sink = "memory"` 时可读取已记录的审计事件
    pub fn memory_audit(&self) -> Option<Arc<InMemoryAuditSink>> {
        self.memory_audit.clone()
    }

    /// 运行所有后台组件，直到 `shutdown` 被取消
    ///
    /// worker 池先退出，状态监听器随后排空剩余的状态更新。
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            dispatcher = self.config.dispatcher.enabled,
            worker = self.config.worker.enabled,
            "启动应用程序"
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        let pending = self
            .audit_consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // 审计消费者最后退出，收尾阶段的审计事件也能落地
        let audit_shutdown = CancellationToken::new();
        let audit_handle =
            pending.map(|(rx, downstream)| spawn_audit_consumer(rx, downstream, audit_shutdown.clone()));

        handles.push(Arc::clone(&self.services.locks).spawn_sweeper(
            Duration::from_secs(self.config.locks.sweep_interval_seconds.max(1)),
            shutdown.clone(),
        ));

        let (updates_tx, updates_rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
        let listener_shutdown = CancellationToken::new();

        if self.config.dispatcher.enabled {
            let scheduler = Arc::clone(&self.scheduler);
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move { scheduler.run(token).await }));

            let listener = StateListener::new(Arc::clone(&self.scheduler), self.services.clone());
            let token = listener_shutdown.clone();
            handles.push(tokio::spawn(async move { listener.run(updates_rx, token).await }));
        } else {
            drop(updates_rx);
        }

        let worker_handle = if self.config.worker.enabled {
            let mut registry = ExecutorRegistry::new();
            for executor in &self.executors {
                registry.register(Arc::clone(executor));
            }
            let pool = Arc::new(ImportWorkerPool::new(
                self.config.worker.clone(),
                Arc::clone(&self.services.queue),
                Arc::clone(&self.services.locks),
                registry,
                updates_tx,
            ));
            let token = shutdown.clone();
            Some(tokio::spawn(async move { pool.run(token).await }))
        } else {
            drop(updates_tx);
            None
        };

        shutdown.cancelled().await;
        info!("开始关闭后台组件");

        if let Some(handle) = worker_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "worker 池异常退出");
            }
        }
        listener_shutdown.cancel();

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "后台任务异常退出");
            }
        }

        audit_shutdown.cancel();
        if let Some(handle) = audit_handle {
            if let Err(e) = handle.await {
                error!(error = %e, "审计消费者异常退出");
            }
        }

        info!("应用程序已停止");
        Ok(())
    }
}

/// 配置了数据库地址时使用 SQLite 持久化调度，否则保存在内存中
async fn create_repositories(
    config: &AppConfig,
) -> Result<(Arc<dyn ScheduleRepository>, Arc<dyn ExecutionHistoryRepository>)> {
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = connect_sqlite(
                url,
                config.database.max_connections,
                Duration::from_secs(config.database.connection_timeout_seconds),
            )
            .await
            .with_context(|| format!("连接数据库失败: {url}"))?;
            run_migrations(&pool).await.context("初始化数据库表结构失败")?;
            let schedules: Arc<dyn ScheduleRepository> =
                Arc::new(SqliteScheduleRepository::new(pool.clone()));
            let history: Arc<dyn ExecutionHistoryRepository> =
                Arc::new(SqliteExecutionHistoryRepository::new(pool));
            Ok((schedules, history))
        }
        None => {
            let schedules: Arc<dyn ScheduleRepository> = Arc::new(InMemoryScheduleRepository::new());
            let history: Arc<dyn ExecutionHistoryRepository> =
                Arc::new(InMemoryExecutionHistoryRepository::new());
            Ok((schedules, history))
        }
    }
}
