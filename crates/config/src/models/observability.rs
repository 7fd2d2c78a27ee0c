use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(format!(
                "Invalid log format: {s}. Valid formats: pretty, json, compact"
            )),
        }
    }
}

pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
pub const AUDIT_SINKS: [&str; 3] = ["tracing", "memory", "channel"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
    /// tracing / memory / channel
    pub audit_sink: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
            audit_sink: "channel".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_one_of(
            &self.log_level.to_lowercase(),
            "observability.log_level",
            &LOG_LEVELS,
        )?;
        ValidationUtils::validate_one_of(
            &self.audit_sink,
            "observability.audit_sink",
            &AUDIT_SINKS,
        )?;
        if self.metrics_enabled {
            self.metrics_bind_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| {
                    crate::ConfigError::Validation(format!(
                        "observability.metrics_bind_address is invalid: {e}"
                    ))
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_observability_validation() {
        let mut config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.log_level = "DEBUG".to_string();
        config.metrics_enabled = true;
        config.metrics_bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }
}
