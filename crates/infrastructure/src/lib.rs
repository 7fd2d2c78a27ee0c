pub mod audit;
pub mod database;
pub mod import_queue;
pub mod lock_manager;
pub mod observability;
pub mod quota_enforcer;
pub mod reservation_manager;

pub use audit::{spawn_audit_consumer, AuditTrail, ChannelAuditSink, InMemoryAuditSink, TracingAuditSink};
pub use database::*;
pub use import_queue::{ImportQueueManager, QueueStats};
pub use lock_manager::ResourceLockManager;
pub use observability::{init_logging, init_metrics, LoggingConfig, MetricsCollector, StructuredLogger};
pub use quota_enforcer::{LimitTemplate, QuotaDecision, ResourceUsageSource, TenantQuotaEnforcer};
pub use reservation_manager::ResourceReservationManager;
