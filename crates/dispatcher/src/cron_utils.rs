use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use cron::Schedule;
use tracing::debug;

use orchestrator_errors::{OrchestratorError, OrchestratorResult};

/// CRON表达式解析和调度工具
pub struct CronScheduler {
    schedule: Schedule,
}

impl CronScheduler {
    /// 创建新的CRON调度器，5 段表达式按秒为 0 处理
    pub fn new(cron_expr: &str) -> OrchestratorResult<Self> {
        let normalized = normalize_fields(cron_expr);
        let schedule = Schedule::from_str(&normalized).map_err(|e| OrchestratorError::InvalidSchedule {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self { schedule })
    }

    /// 获取严格晚于 `from` 的下一次执行时间
    pub fn next_execution_time(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&from).next()
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule.after(&from).take(count).collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> OrchestratorResult<()> {
        Self::new(cron_expr).map(|_| ())
    }

    /// 统计 (`from`, `until`] 之间错过的触发次数，最多数到 `limit`
    pub fn missed_occurrences(&self, from: DateTime<Utc>, until: DateTime<Utc>, limit: usize) -> usize {
        self.schedule
            .after(&from)
            .take_while(|t| *t <= until)
            .take(limit)
            .count()
    }

    /// 计算下次执行时间距离现在的时长
    pub fn time_until_next_execution(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_execution_time(now).map(|next| next - now)
    }
}

fn normalize_fields(cron_expr: &str) -> String {
    let trimmed = cron_expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// 调度表达式：CRON 或一次性的时间点
pub enum ScheduleExpression {
    Cron(CronScheduler),
    Once(DateTime<Utc>),
}

impl ScheduleExpression {
    /// 先按 RFC 3339 / ISO-8601 时间点解析，失败后按 CRON 解析
    pub fn parse(expr: &str) -> OrchestratorResult<Self> {
        let trimmed = expr.trim();
        if let Some(at) = parse_datetime(trimmed) {
            debug!(expr = trimmed, at = %at, "解析为一次性调度");
            return Ok(Self::Once(at));
        }
        CronScheduler::new(trimmed).map(Self::Cron)
    }

    pub fn is_one_off(&self) -> bool {
        matches!(self, Self::Once(_))
    }

    /// 严格晚于 `from` 的下一个触发时间；一次性调度的时间点已过时返回 `None`
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(cron) => cron.next_execution_time(from),
            Self::Once(at) if *at > from => Some(*at),
            Self::Once(_) => None,
        }
    }
}

fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Some(at.with_timezone(&Utc));
    }
    // 不带时区的 ISO-8601 按 UTC 处理
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
