use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub tick_interval_seconds: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_seconds: u64,
    pub default_timeout_minutes: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 10,
            default_max_retries: 3,
            default_retry_delay_seconds: 900,
            default_timeout_minutes: 60,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.tick_interval_seconds,
            "dispatcher.tick_interval_seconds",
            3600,
        )?;
        ValidationUtils::validate_seconds(
            self.default_retry_delay_seconds,
            "dispatcher.default_retry_delay_seconds",
            86_400,
        )?;
        ValidationUtils::validate_seconds(
            self.default_timeout_minutes,
            "dispatcher.default_timeout_minutes",
            24 * 60,
        )?;
        if self.default_max_retries > 100 {
            return Err(crate::ConfigError::Validation(
                "dispatcher.default_max_retries must be less than or equal to 100".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub worker_id: String,
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub lock_ttl_seconds: u64,
    /// 锁冲突时的最长等待时间，超过后请求以 LockConflict 失败
    pub lock_wait_seconds: u64,
    /// 单次执行的兜底超时，调度请求以调度自身的 timeout_minutes 为准
    pub execution_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: "worker".to_string(),
            concurrency: 4,
            poll_interval_ms: 500,
            lock_ttl_seconds: 600,
            lock_wait_seconds: 30,
            execution_timeout_seconds: 3600,
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_count(self.concurrency, "worker.concurrency", 256)?;
        ValidationUtils::validate_seconds(self.poll_interval_ms, "worker.poll_interval_ms", 60_000)?;
        ValidationUtils::validate_seconds(self.lock_ttl_seconds, "worker.lock_ttl_seconds", 86_400)?;
        ValidationUtils::validate_seconds(
            self.execution_timeout_seconds,
            "worker.execution_timeout_seconds",
            86_400,
        )?;
        if self.lock_wait_seconds > 3600 {
            return Err(crate::ConfigError::Validation(
                "worker.lock_wait_seconds must be less than or equal to 3600".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_defaults() {
        let config = DispatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_retry_delay_seconds, 15 * 60);
    }

    #[test]
    fn test_worker_validation() {
        let mut config = WorkerConfig::default();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());

        config.concurrency = 2;
        config.worker_id = " ".to_string();
        assert!(config.validate().is_err());
    }
}
