use chrono::{DateTime, Utc};
use orchestrator_domain::Schedule;
use serde::{Deserialize, Serialize};

/// 一次失败尝试之后的处理方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDecision {
    /// 在 `retry_at` 重新触发，`attempt` 为第几次重试（从 1 开始）
    Retry { attempt: u32, retry_at: DateTime<Utc> },
    /// 重试已用尽
    Exhausted { retries: u32 },
}

/// 调度级别的重试策略：固定间隔，最多 `max_retries` 次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: chrono::Duration,
}

impl RetryPolicy {
    pub fn for_schedule(schedule: &Schedule) -> Self {
        Self {
            max_retries: schedule.max_retries,
            retry_delay: schedule.retry_delay(),
        }
    }

    /// `retries_so_far` 为本次执行已安排过的重试次数
    pub fn decide(&self, retries_so_far: u32, now: DateTime<Utc>) -> RetryDecision {
        if retries_so_far < self.max_retries {
            RetryDecision::Retry {
                attempt: retries_so_far + 1,
                retry_at: now + self.retry_delay,
            }
        } else {
            RetryDecision::Exhausted {
                retries: retries_so_far,
            }
        }
    }
}
