use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    /// 秒级间隔/超时：必须在 (0, max] 内
    pub fn validate_seconds(value: u64, field_name: &str, max: u64) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if value > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be greater than 0"
            )));
        }
        if count > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} must be less than or equal to {max}"
            )));
        }
        Ok(())
    }

    pub fn validate_one_of(value: &str, field_name: &str, allowed: &[&str]) -> ConfigResult<()> {
        if !allowed.contains(&value) {
            return Err(ConfigError::Validation(format!(
                "Invalid {field_name}: {value}. Valid options: {allowed:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("test", "field").is_ok());
        assert!(ValidationUtils::validate_not_empty("   ", "field").is_err());
    }

    #[test]
    fn test_validate_seconds() {
        assert!(ValidationUtils::validate_seconds(30, "ttl", 3600).is_ok());
        assert!(ValidationUtils::validate_seconds(3600, "ttl", 3600).is_ok());
        assert!(ValidationUtils::validate_seconds(0, "ttl", 3600).is_err());
        assert!(ValidationUtils::validate_seconds(3601, "ttl", 3600).is_err());
    }

    #[test]
    fn test_validate_count() {
        assert!(ValidationUtils::validate_count(1, "workers", 64).is_ok());
        assert!(ValidationUtils::validate_count(0, "workers", 64).is_err());
        assert!(ValidationUtils::validate_count(65, "workers", 64).is_err());
    }

    #[test]
    fn test_validate_one_of() {
        assert!(ValidationUtils::validate_one_of("HARD", "level", &["HARD", "SOFT"]).is_ok());
        let err = ValidationUtils::validate_one_of("STRICT", "level", &["HARD"]).unwrap_err();
        assert!(err.to_string().contains("STRICT"));
    }
}
