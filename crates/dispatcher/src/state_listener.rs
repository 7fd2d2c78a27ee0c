use std::sync::Arc;

use orchestrator_domain::{ImportRequestStatus, ImportStatusUpdate, OrchestrationState};
use orchestrator_errors::OrchestratorResult;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::CoordinationServices;
use crate::scheduler::ImportScheduler;

/// 消费 worker 上报的状态更新：调度执行交给调度器收尾，其余请求只更新编排状态
pub struct StateListener {
    scheduler: Arc<ImportScheduler>,
    services: CoordinationServices,
}

impl StateListener {
    pub fn new(scheduler: Arc<ImportScheduler>, services: CoordinationServices) -> Self {
        Self {
            scheduler,
            services,
        }
    }

    pub async fn process_update(&self, update: &ImportStatusUpdate) -> OrchestratorResult<()> {
        debug!(
            request.id = %update.request_id,
            worker.id = %update.worker_id,
            status = %update.status,
            "处理状态更新"
        );
        if !update.status.is_terminal() {
            return Ok(());
        }

        if update.is_scheduled_execution() {
            return self.scheduler.complete_request(update).await;
        }

        let Some(request) = self.services.queue.get(update.request_id) else {
            warn!(request.id = %update.request_id, "收到未知请求的状态更新");
            return Ok(());
        };
        if let Some(orchestration_id) = request.orchestration_id {
            let state = match update.status {
                ImportRequestStatus::Completed => OrchestrationState::Succeeded,
                ImportRequestStatus::Failed => OrchestrationState::Failed,
                _ => OrchestrationState::Cancelled,
            };
            self.services
                .dependency_graph
                .set_state(orchestration_id, state);
            self.services
                .dependency_graph
                .mark_resources_released(orchestration_id);
        }
        Ok(())
    }

    /// 关闭时把通道中剩余的更新处理完再退出
    pub async fn run(
        &self,
        mut updates: mpsc::Receiver<ImportStatusUpdate>,
        shutdown: CancellationToken,
    ) {
        info!("状态监听器启动");
        loop {
            tokio::select! {
                update = updates.recv() => {
                    match update {
                        Some(update) => self.handle(&update).await,
                        None => {
                            info!("状态通道已关闭，状态监听器退出");
                            return;
                        }
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        updates.close();
        while let Some(update) = updates.recv().await {
            self.handle(&update).await;
        }
        info!("状态监听器已停止");
    }

    async fn handle(&self, update: &ImportStatusUpdate) {
        if let Err(e) = self.process_update(update).await {
            error!(
                request.id = %update.request_id,
                error = %e,
                "处理状态更新失败"
            );
        }
    }
}
