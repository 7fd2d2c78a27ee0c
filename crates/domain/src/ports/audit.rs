use crate::events::AuditEvent;
use orchestrator_errors::OrchestratorResult;

/// 审计落地接口
///
/// 调用方不会等待审计结果，失败只记录日志，不影响业务状态。
/// 实现必须是非阻塞的，耗时写入应交给后台任务完成。
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> OrchestratorResult<()>;
}
