use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 关闭信号就是一个 `CancellationToken`，调度循环、worker 池等后台任务
/// 持有它的克隆。克隆出的管理器共享同一个令牌。
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 关闭时被取消的令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭，重复调用无副作用
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            debug!("关闭管理器已经触发过关闭");
            return;
        }
        info!("触发系统关闭");
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待关闭信号，已经关闭时立即返回
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 触发关闭并等待 `task` 结束，超过 `grace` 后放弃等待
    pub async fn shutdown_and_wait<F>(&self, task: F, grace: Duration) -> bool
    where
        F: std::future::Future + Send,
    {
        self.shutdown();
        match tokio::time::timeout(grace, task).await {
            Ok(_) => {
                info!("后台任务已全部退出");
                true
            }
            Err(_) => {
                warn!(grace_seconds = grace.as_secs(), "等待后台任务退出超时");
                false
            }
        }
    }
}
