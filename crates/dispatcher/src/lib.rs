//! 调度端
//!
//! 调度器、准入控制、编排依赖图以及 worker 状态更新的消费者。

pub mod admission;
pub mod cron_utils;
pub mod dependency_graph;
pub mod retry_policy;
pub mod scheduler;
pub mod state_listener;

pub use admission::{AdmissionController, AdmittedExecution, CoordinationServices};
pub use cron_utils::{CronScheduler, ScheduleExpression};
pub use dependency_graph::OrchestrationDependencyGraph;
pub use retry_policy::{RetryDecision, RetryPolicy};
pub use scheduler::{ImportScheduler, TickReport, TriggerOutcome};
pub use state_listener::StateListener;
