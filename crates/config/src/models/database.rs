use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 为空时调度与执行历史只保存在内存中
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseConfig {
    pub fn is_persistent(&self) -> bool {
        self.url.is_some()
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(url) = &self.url {
            ValidationUtils::validate_not_empty(url, "database.url")?;
            if !url.starts_with("sqlite:") {
                return Err(crate::ConfigError::Validation(
                    "database.url must start with sqlite:".to_string(),
                ));
            }
        }
        ValidationUtils::validate_count(
            self.max_connections as usize,
            "database.max_connections",
            100,
        )?;
        ValidationUtils::validate_seconds(
            self.connection_timeout_seconds,
            "database.connection_timeout_seconds",
            300,
        )?;
        Ok(())
    }
}
