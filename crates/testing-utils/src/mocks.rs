//! Mock implementations of the executor and audit ports
//!
//! `MockImportExecutor` follows a script of behaviours, one per call; the
//! last behaviour repeats once the script is exhausted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{AuditEvent, AuditSink, ImportExecutor, ImportOutcome, ImportRequest};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the mock executor does on a call
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed(u64),
    Fail(String),
    /// Return an `ExecutorFailure` error instead of a failed outcome
    Error(String),
    /// Sleep, then succeed; cancellation ends the call early
    Delay(Duration, u64),
    /// Block until the cancellation token fires
    WaitForCancel,
}

#[derive(Clone)]
pub struct MockImportExecutor {
    name: String,
    import_types: Vec<String>,
    script: Arc<Mutex<VecDeque<MockBehavior>>>,
    fallback: Arc<Mutex<MockBehavior>>,
    calls: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<Uuid>>>,
}

impl MockImportExecutor {
    pub fn new(import_type: &str) -> Self {
        Self {
            name: format!("mock-{import_type}"),
            import_types: vec![import_type.to_string()],
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(MockBehavior::Succeed(0))),
            calls: Arc::new(AtomicUsize::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn succeeding(import_type: &str, records: u64) -> Self {
        Self::new(import_type).with_behavior(MockBehavior::Succeed(records))
    }

    pub fn failing(import_type: &str, message: &str) -> Self {
        Self::new(import_type).with_behavior(MockBehavior::Fail(message.to_string()))
    }

    /// Append a behaviour to the script
    pub fn with_behavior(self, behavior: MockBehavior) -> Self {
        self.script.lock().unwrap().push_back(behavior.clone());
        *self.fallback.lock().unwrap() = behavior;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn executed_requests(&self) -> Vec<Uuid> {
        self.executed.lock().unwrap().clone()
    }

    fn next_behavior(&self) -> MockBehavior {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap_or(MockBehavior::Succeed(0))
        } else {
            self.fallback.lock().unwrap().clone()
        }
    }
}

#[async_trait]
impl ImportExecutor for MockImportExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_import_type(&self, import_type: &str) -> bool {
        self.import_types.iter().any(|t| t == import_type)
    }

    async fn execute(
        &self,
        request: &ImportRequest,
        cancel: CancellationToken,
    ) -> OrchestratorResult<ImportOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(request.id);

        match self.next_behavior() {
            MockBehavior::Succeed(records) => Ok(ImportOutcome::success(records)),
            MockBehavior::Fail(message) => Ok(ImportOutcome::failure(message)),
            MockBehavior::Error(message) => Err(OrchestratorError::executor_failure(message)),
            MockBehavior::Delay(delay, records) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Ok(ImportOutcome::success(records)),
                    _ = cancel.cancelled() => Ok(ImportOutcome::cancelled("cancelled during delay")),
                }
            }
            MockBehavior::WaitForCancel => {
                cancel.cancelled().await;
                Ok(ImportOutcome::cancelled("cancelled"))
            }
        }
    }
}

/// Audit sink that always fails, for checking that audit errors are swallowed
#[derive(Debug, Default)]
pub struct FailingAuditSink {
    attempts: AtomicUsize,
}

impl FailingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl AuditSink for FailingAuditSink {
    fn record(&self, event: &AuditEvent) -> OrchestratorResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(OrchestratorError::internal(format!(
            "audit sink unavailable for {}",
            event.event_type.as_str()
        )))
    }
}
