use std::collections::BTreeMap;

use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

pub const ENFORCEMENT_LEVELS: [&str; 3] = ["HARD", "SOFT", "ADVISORY"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 排队中请求的上限，0 表示不限
    pub max_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_depth: 10_000 }
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            sweep_interval_seconds: 30,
        }
    }
}

impl ConfigValidator for LockConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.default_ttl_seconds,
            "locks.default_ttl_seconds",
            86_400,
        )?;
        ValidationUtils::validate_seconds(
            self.sweep_interval_seconds,
            "locks.sweep_interval_seconds",
            3600,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservationConfig {
    /// 资源类型 -> 全局容量；未配置的类型不限容量
    pub capacities: BTreeMap<String, u64>,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        let capacities = [
            ("cpu_slots", 16),
            ("memory", 16_384),
            ("db_connections", 20),
            ("concurrent_imports", 10),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { capacities }
    }
}

impl ConfigValidator for ReservationConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        for (resource_type, capacity) in &self.capacities {
            ValidationUtils::validate_not_empty(resource_type, "reservations.capacities")?;
            if *capacity == 0 {
                return Err(crate::ConfigError::Validation(format!(
                    "reservations.capacities.{resource_type} must be greater than 0"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultTenantLimit {
    pub resource_type: String,
    pub limit: u64,
    pub unit: String,
    pub enforcement_level: String,
}

impl DefaultTenantLimit {
    fn hard(resource_type: &str, limit: u64, unit: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            limit,
            unit: unit.to_string(),
            enforcement_level: "HARD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// 租户首次出现时写入的默认配额
    pub default_limits: Vec<DefaultTenantLimit>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limits: vec![
                DefaultTenantLimit::hard("cpu_slots", 2, "slots"),
                DefaultTenantLimit::hard("memory", 1024, "MB"),
                DefaultTenantLimit::hard("db_connections", 3, "connections"),
                DefaultTenantLimit::hard("concurrent_imports", 2, "imports"),
            ],
        }
    }
}

impl ConfigValidator for QuotaConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for limit in &self.default_limits {
            ValidationUtils::validate_not_empty(
                &limit.resource_type,
                "quota.default_limits.resource_type",
            )?;
            if limit.limit == 0 {
                return Err(crate::ConfigError::Validation(format!(
                    "quota.default_limits.{} must be greater than 0",
                    limit.resource_type
                )));
            }
            ValidationUtils::validate_one_of(
                &limit.enforcement_level,
                "quota.default_limits.enforcement_level",
                &ENFORCEMENT_LEVELS,
            )?;
            if !seen.insert(limit.resource_type.as_str()) {
                return Err(crate::ConfigError::Validation(format!(
                    "quota.default_limits contains duplicate resource type {}",
                    limit.resource_type
                )));
            }
        }
        Ok(())
    }
}
