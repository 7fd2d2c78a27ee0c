use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{ImportExecutor, ImportOutcome, ImportRequest};
use orchestrator_errors::OrchestratorResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 不接外部系统的演示执行器
///
/// 从请求的 `configuration` 读取 `records`（默认 100）、`duration_ms`（默认 200）
/// 和 `fail`（默认 false），按批次模拟处理，期间响应取消。
pub struct SimulatedImportExecutor {
    name: String,
    import_types: Vec<String>,
}

impl SimulatedImportExecutor {
    pub fn new(name: impl Into<String>, import_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            import_types,
        }
    }
}

const BATCHES: u64 = 10;

#[async_trait]
impl ImportExecutor for SimulatedImportExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    /// 未配置导入类型时接受任何类型
    fn supports_import_type(&self, import_type: &str) -> bool {
        self.import_types.is_empty() || self.import_types.iter().any(|t| t == import_type)
    }

    async fn execute(
        &self,
        request: &ImportRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<ImportOutcome> {
        let config = &request.configuration;
        let records = config.get("records").and_then(|v| v.as_u64()).unwrap_or(100);
        let duration_ms = config
            .get("duration_ms")
            .and_then(|v| v.as_u64())
            .unwrap_or(200);
        let should_fail = config.get("fail").and_then(|v| v.as_bool()).unwrap_or(false);

        info!(
            request.id = %request.id,
            import_type = %request.import_type,
            records,
            "开始模拟导入"
        );

        let batch_delay = Duration::from_millis(duration_ms / BATCHES);
        let mut processed = 0;
        for batch in 0..BATCHES {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(request.id = %request.id, processed, "模拟导入被取消");
                    return Ok(ImportOutcome::cancelled("导入已取消").with_records(processed));
                }
                _ = tokio::time::sleep(batch_delay) => {}
            }
            processed = records * (batch + 1) / BATCHES;
        }

        if should_fail {
            return Ok(ImportOutcome::failure(format!(
                "模拟导入失败，已处理 {processed} 条"
            )));
        }
        Ok(ImportOutcome::success(processed).with_details(serde_json::json!({
            "executor": self.name,
            "batches": BATCHES,
        })))
    }
}
