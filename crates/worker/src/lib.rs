//! Worker 端
//!
//! 从导入队列取请求，获取资源锁后交给执行器，并把结果回报给调度端。

pub mod backoff;
pub mod executor_registry;
pub mod executors;
pub mod service;

pub use backoff::BackoffPolicy;
pub use executor_registry::ExecutorRegistry;
pub use executors::SimulatedImportExecutor;
pub use service::ImportWorkerPool;
