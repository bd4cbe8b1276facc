//! Configuration for Mailsift

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Daemon identity
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Cross-instance learning configuration
    #[serde(default)]
    pub learning: LearningConfig,

    /// SRS rewriter configuration
    #[serde(default)]
    pub srs: SrsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Daemon identity configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Instance name, scopes the verdict report channel. Must be set.
    #[serde(default)]
    pub instance: String,

    /// Hostname reported alongside verdicts
    #[serde(default = "default_hostname")]
    pub hostname: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            instance: String::new(),
            hostname: default_hostname(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Cross-instance learning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Enable the learning pipeline. When disabled, reporting a verdict
    /// is a no-op.
    #[serde(default = "default_learning_enabled")]
    pub enabled: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: default_learning_enabled(),
        }
    }
}

fn default_learning_enabled() -> bool {
    true
}

/// SRS rewriter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrsConfig {
    /// Enable the SRS check module
    #[serde(default)]
    pub enabled: bool,

    /// Header whose presence and values indicate whether a message
    /// was forwarded
    #[serde(default = "default_recipient_header")]
    pub recipient_header: String,
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipient_header: default_recipient_header(),
        }
    }
}

fn default_recipient_header() -> String {
    "X-Original-To".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/mailsift/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }

    /// Validate the loaded configuration. The report channel is scoped by
    /// instance name, so running without one would cross-feed verdicts
    /// between unrelated deployments.
    pub fn validate(&self) -> crate::Result<()> {
        if self.daemon.instance.is_empty() {
            return Err(crate::Error::Config(
                "daemon.instance must be set".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert!(config.learning.enabled);
        assert!(!config.srs.enabled);
        assert_eq!(config.srs.recipient_header, "X-Original-To");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[daemon]
instance = "mx1"
hostname = "mx1.example.com"

[redis]
url = "redis://redis.internal:6379"

[learning]
enabled = true

[srs]
enabled = true
recipient_header = "Delivered-To"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.daemon.instance, "mx1");
        assert_eq!(config.redis.url, "redis://redis.internal:6379");
        assert!(config.srs.enabled);
        assert_eq!(config.srs.recipient_header, "Delivered-To");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_instance() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }
}
