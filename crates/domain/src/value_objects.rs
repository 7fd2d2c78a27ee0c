use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 优先级范围，1 为最高
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 20;

/// 内置的资源类型名称
pub mod resource_types {
    pub const CPU_SLOTS: &str = "cpu_slots";
    pub const MEMORY: &str = "memory";
    pub const DB_CONNECTIONS: &str = "db_connections";
    pub const CONCURRENT_IMPORTS: &str = "concurrent_imports";
}

/// 资源类型 -> 需求量
pub type ResourceRequirements = BTreeMap<String, u64>;

pub fn is_valid_priority(priority: u8) -> bool {
    (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub resource_type: String,
    pub resource_id: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.resource_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Exclusive,
    Shared,
}

impl LockType {
    /// 只有 SHARED 与 SHARED 可以共存
    pub fn is_compatible_with(self, other: LockType) -> bool {
        matches!((self, other), (LockType::Shared, LockType::Shared))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockType::Exclusive => "EXCLUSIVE",
            LockType::Shared => "SHARED",
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行期间需要持有的锁
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequirement {
    pub key: ResourceKey,
    pub lock_type: LockType,
}

impl LockRequirement {
    pub fn exclusive(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            key: ResourceKey::new(resource_type, resource_id),
            lock_type: LockType::Exclusive,
        }
    }

    pub fn shared(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            key: ResourceKey::new(resource_type, resource_id),
            lock_type: LockType::Shared,
        }
    }
}
