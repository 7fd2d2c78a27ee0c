use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据验证失败: {0}")]
    ValidationError(String),
    #[error("资源锁冲突: {resource_type}/{resource_id} 已被请求 {holder} 以 {held_as} 方式持有")]
    LockConflict {
        resource_type: String,
        resource_id: String,
        holder: Uuid,
        held_as: String,
    },
    #[error("租户配额超限: 租户 {tenant_id} 资源 {resource_type} 请求 {requested}, 已使用 {consumed}, 上限 {limit}")]
    QuotaExceeded {
        tenant_id: String,
        resource_type: String,
        requested: u64,
        consumed: u64,
        limit: u64,
    },
    #[error("资源预留冲突: 资源 {resource_type} 请求 {requested}, 时间窗口内峰值 {peak}, 容量 {capacity}")]
    ReservationConflict {
        resource_type: String,
        requested: u64,
        peak: u64,
        capacity: u64,
    },
    #[error("检测到循环依赖: 编排 {orchestration_id} 依赖 {depends_on_id} 将形成环")]
    CycleError {
        orchestration_id: Uuid,
        depends_on_id: Uuid,
    },
    #[error("编排依赖未满足: {orchestration_id} 被 {blocking:?} 阻塞")]
    DependencyNotSatisfied {
        orchestration_id: Uuid,
        blocking: Vec<Uuid>,
    },
    #[error("导入执行超时: {0}")]
    ExecutionTimeout(String),
    #[error("导入执行器失败: {0}")]
    ExecutorFailure(String),
    #[error("非法状态转换: {entity} {id} 从 {from} 到 {to}")]
    InvalidTransition {
        entity: &'static str,
        id: Uuid,
        from: String,
        to: String,
    },
    #[error("无效的调度表达式: {expr} - {message}")]
    InvalidSchedule { expr: String, message: String },
    #[error("导入请求未找到: {id}")]
    RequestNotFound { id: Uuid },
    #[error("调度未找到: {id}")]
    ScheduleNotFound { id: Uuid },
    #[error("执行记录未找到: {id}")]
    ExecutionNotFound { id: Uuid },
    #[error("资源预留未找到: {id}")]
    ReservationNotFound { id: Uuid },
    #[error("未找到支持导入类型 '{0}' 的执行器")]
    ExecutorNotFound(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn executor_failure<S: Into<String>>(msg: S) -> Self {
        Self::ExecutorFailure(msg.into())
    }
    pub fn timeout_error<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionTimeout(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 准入阶段的阻塞：调度触发时按 retry_delay 重试，网关提交时直接返回给调用方
    pub fn is_admission_blocked(&self) -> bool {
        matches!(
            self,
            OrchestratorError::QuotaExceeded { .. }
                | OrchestratorError::ReservationConflict { .. }
                | OrchestratorError::DependencyNotSatisfied { .. }
        )
    }

    /// 运行期错误，由调度器的重试逻辑处理
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::LockConflict { .. }
                | OrchestratorError::ExecutionTimeout(_)
                | OrchestratorError::ExecutorFailure(_)
        ) || self.is_admission_blocked()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_) | OrchestratorError::Configuration(_)
        )
    }

    /// 稳定的错误类别名，用于审计和指标标签
    pub fn error_kind(&self) -> &'static str {
        match self {
            OrchestratorError::Database(_) => "database",
            OrchestratorError::ValidationError(_) => "validation",
            OrchestratorError::LockConflict { .. } => "lock_conflict",
            OrchestratorError::QuotaExceeded { .. } => "quota_exceeded",
            OrchestratorError::ReservationConflict { .. } => "reservation_conflict",
            OrchestratorError::CycleError { .. } => "cycle",
            OrchestratorError::DependencyNotSatisfied { .. } => "dependency_not_satisfied",
            OrchestratorError::ExecutionTimeout(_) => "execution_timeout",
            OrchestratorError::ExecutorFailure(_) => "executor_failure",
            OrchestratorError::InvalidTransition { .. } => "invalid_transition",
            OrchestratorError::InvalidSchedule { .. } => "invalid_schedule",
            OrchestratorError::RequestNotFound { .. }
            | OrchestratorError::ScheduleNotFound { .. }
            | OrchestratorError::ExecutionNotFound { .. }
            | OrchestratorError::ReservationNotFound { .. } => "not_found",
            OrchestratorError::ExecutorNotFound(_) => "executor_not_found",
            OrchestratorError::Serialization(_) => "serialization",
            OrchestratorError::Configuration(_) => "configuration",
            OrchestratorError::Internal(_) => "internal",
        }
    }

    pub fn user_message(&self) -> &str {
        match self {
            OrchestratorError::ValidationError(_) => "输入数据验证失败",
            OrchestratorError::QuotaExceeded { .. } => "租户资源配额不足，请求被拒绝",
            OrchestratorError::ReservationConflict { .. } => "目标时间窗口资源容量不足",
            OrchestratorError::CycleError { .. } => "依赖配置会形成循环，已拒绝",
            OrchestratorError::LockConflict { .. } => "资源正被占用，请稍后重试",
            OrchestratorError::RequestNotFound { .. } => "请求的导入任务不存在",
            OrchestratorError::ScheduleNotFound { .. } => "请求的调度不存在",
            OrchestratorError::InvalidSchedule { .. } => "调度表达式配置有误",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

impl From<uuid::Error> for OrchestratorError {
    fn from(err: uuid::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests;
