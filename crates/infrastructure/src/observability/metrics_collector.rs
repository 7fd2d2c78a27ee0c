use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// 编排核心的指标
///
/// 无标签的指标在构造时取得句柄；带标签的指标在调用时通过宏记录。
/// 需要在安装全局 recorder 之后构造，否则句柄是空操作。
pub struct MetricsCollector {
    queue_depth: Gauge,
    requests_enqueued_total: Counter,
    requests_dequeued_total: Counter,
    execution_duration: Histogram,
    locks_swept_total: Counter,
    schedule_firings_total: Counter,
    schedule_retries_total: Counter,
    schedule_exhausted_total: Counter,
    execution_timeouts_total: Counter,
    scheduler_tick_duration: Histogram,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            queue_depth: gauge!("orchestrator_queue_depth"),
            requests_enqueued_total: counter!("orchestrator_requests_enqueued_total"),
            requests_dequeued_total: counter!("orchestrator_requests_dequeued_total"),
            execution_duration: histogram!("orchestrator_execution_duration_seconds"),
            locks_swept_total: counter!("orchestrator_locks_swept_total"),
            schedule_firings_total: counter!("orchestrator_schedule_firings_total"),
            schedule_retries_total: counter!("orchestrator_schedule_retries_total"),
            schedule_exhausted_total: counter!("orchestrator_schedule_exhausted_total"),
            execution_timeouts_total: counter!("orchestrator_execution_timeouts_total"),
            scheduler_tick_duration: histogram!("orchestrator_scheduler_tick_duration_seconds"),
        }
    }

    // Queue

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn record_enqueued(&self) {
        self.requests_enqueued_total.increment(1);
    }

    pub fn record_dequeued(&self) {
        self.requests_dequeued_total.increment(1);
    }

    pub fn record_request_finished(&self, import_type: &str, status: &str, duration_seconds: f64) {
        counter!(
            "orchestrator_request_completions_total",
            "import_type" => import_type.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        self.execution_duration.record(duration_seconds);
    }

    // Locks

    pub fn record_lock_conflict(&self, resource_type: &str) {
        counter!(
            "orchestrator_lock_conflicts_total",
            "resource_type" => resource_type.to_string()
        )
        .increment(1);
    }

    pub fn record_locks_swept(&self, count: usize) {
        self.locks_swept_total.increment(count as u64);
    }

    // Admission

    pub fn record_quota_decision(&self, resource_type: &str, decision: &str) {
        counter!(
            "orchestrator_quota_decisions_total",
            "resource_type" => resource_type.to_string(),
            "decision" => decision.to_string()
        )
        .increment(1);
    }

    pub fn record_reservation_conflict(&self, resource_type: &str) {
        counter!(
            "orchestrator_reservation_conflicts_total",
            "resource_type" => resource_type.to_string()
        )
        .increment(1);
    }

    // Scheduler

    pub fn record_schedule_fired(&self) {
        self.schedule_firings_total.increment(1);
    }

    pub fn record_schedule_retry(&self) {
        self.schedule_retries_total.increment(1);
    }

    pub fn record_schedule_exhausted(&self) {
        self.schedule_exhausted_total.increment(1);
    }

    pub fn record_execution_timeout(&self) {
        self.execution_timeouts_total.increment(1);
    }

    pub fn record_tick_duration(&self, duration_seconds: f64) {
        self.scheduler_tick_duration.record(duration_seconds);
    }
}
