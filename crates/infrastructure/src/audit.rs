//! 审计落地
//!
//! `AuditTrail` 是各管理器持有的句柄，审计失败只记录告警，不影响调用方。

use std::sync::{Arc, Mutex, PoisonError};

use orchestrator_domain::{AuditEvent, AuditEventType, AuditSink};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// 直接写日志的审计句柄
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingAuditSink))
    }

    pub fn record(&self, event_type: AuditEventType, entity_id: impl ToString, details: serde_json::Value) {
        let event = AuditEvent::new(event_type, entity_id, details);
        if let Err(e) = self.sink.record(&event) {
            warn!(
                audit.event_type = %event.event_type,
                audit.entity_id = %event.entity_id,
                error = %e,
                "审计事件写入失败，已忽略"
            );
        }
    }
}

/// 把审计事件写成 tracing 日志
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> OrchestratorResult<()> {
        info!(
            event = "audit",
            audit.event_type = %event.event_type,
            audit.entity_id = %event.entity_id,
            audit.details = %event.details,
            audit.occurred_at = %event.occurred_at,
            "audit"
        );
        Ok(())
    }
}

/// 保存在内存中的审计记录，可查询
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn events_for(&self, entity_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> OrchestratorResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }
}

/// 通过无界通道交给后台任务处理，调用方从不阻塞
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, event: &AuditEvent) -> OrchestratorResult<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| OrchestratorError::internal("审计通道已关闭"))
    }
}

/// 后台消费审计通道，转发给下游 sink；关闭信号到达后排空剩余事件再退出
pub fn spawn_audit_consumer(
    mut rx: mpsc::UnboundedReceiver<AuditEvent>,
    downstream: Arc<dyn AuditSink>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => forward(&*downstream, &event),
                        None => break,
                    }
                }
                _ = shutdown.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        forward(&*downstream, &event);
                    }
                    break;
                }
            }
        }
        debug!("审计消费者已退出");
    })
}

fn forward(sink: &dyn AuditSink, event: &AuditEvent) {
    if let Err(e) = sink.record(event) {
        warn!(audit.event_type = %event.event_type, error = %e, "下游审计写入失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectingSink;

    impl AuditSink for RejectingSink {
        fn record(&self, _event: &AuditEvent) -> OrchestratorResult<()> {
            Err(OrchestratorError::internal("sink offline"))
        }
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let trail = AuditTrail::new(Arc::new(RejectingSink));
        trail.record(
            AuditEventType::RequestQueued,
            "req-1",
            serde_json::json!({}),
        );
    }

    #[test]
    fn test_in_memory_sink_queries() {
        let sink = Arc::new(InMemoryAuditSink::new());
        let trail = AuditTrail::new(sink.clone());
        trail.record(AuditEventType::RequestQueued, "a", serde_json::json!({}));
        trail.record(AuditEventType::RequestCancelled, "a", serde_json::json!({}));
        trail.record(AuditEventType::RequestQueued, "b", serde_json::json!({}));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type(AuditEventType::RequestQueued).len(), 2);
        assert_eq!(sink.events_for("a").len(), 2);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_to_downstream() {
        let (channel_sink, rx) = ChannelAuditSink::new();
        let downstream = Arc::new(InMemoryAuditSink::new());
        let shutdown = CancellationToken::new();
        let handle = spawn_audit_consumer(rx, downstream.clone(), shutdown.clone());

        let trail = AuditTrail::new(Arc::new(channel_sink));
        trail.record(AuditEventType::LockAcquired, "orders", serde_json::json!({}));
        trail.record(AuditEventType::LockReleased, "orders", serde_json::json!({}));

        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(downstream.len(), 2);
    }
}
