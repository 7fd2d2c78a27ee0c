use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::entities::{ImportOutcome, ImportRequest};
use orchestrator_errors::OrchestratorResult;

/// 导入执行器接口
///
/// 执行器负责真正的数据转换与加载。长时间运行的实现应定期检查
/// `cancel` 令牌，令牌触发后尽快返回。
#[async_trait]
pub trait ImportExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn supports_import_type(&self, import_type: &str) -> bool;

    async fn execute(
        &self,
        request: &ImportRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<ImportOutcome>;
}
