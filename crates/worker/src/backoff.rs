use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 锁冲突重试的退避参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// 基础间隔（毫秒）
    pub base_interval_ms: u64,
    /// 最大间隔（毫秒）
    pub max_interval_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval_ms: 50,
            max_interval_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// 第 `attempt` 次重试前的等待时间（从 0 开始）
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_interval_ms as f64;
        let exponential = base * self.backoff_multiplier.powi(attempt.min(30) as i32);
        let capped = exponential.min(self.max_interval_ms as f64);

        // 抖动让同时冲突的 worker 错开重试
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let millis = (capped + jitter).clamp(base.min(capped), self.max_interval_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = BackoffPolicy {
            base_interval_ms: 100,
            max_interval_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= Duration::from_millis(policy.base_interval_ms));
                assert!(delay <= Duration::from_millis(policy.max_interval_ms));
            }
        }
    }
}
