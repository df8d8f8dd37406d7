//! Configuration management for the Pensieve API
//!
//! This module provides a centralized configuration system that loads settings from:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct for Pensieve
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PensieveConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Backup scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite:///var/lib/pensieve/pensieve.db")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Backup scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Directory for backup export artifacts
    pub data_dir: PathBuf,
    /// Cron expression for the daily retention sweep
    pub cleanup_schedule: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Enable file logging
    pub file_logging_enabled: bool,
}

impl Default for PensieveConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            scheduler: SchedulerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8440,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/pensieve/pensieve.db".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/pensieve/backups"),
            // 03:00 UTC daily, off the usual top-of-hour spikes
            cleanup_schedule: "0 0 3 * * *".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: PathBuf::from("/var/log/pensieve"),
            file_logging_enabled: false,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl PensieveConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Self {
        let mut config = Self::default();

        // Try to load from config file first
        if let Some(config_path) = Self::find_config_file() {
            if let Ok(file_config) = Self::load_from_file(&config_path) {
                config = file_config;
            }
        }

        // Override with environment variables
        config.apply_env_overrides();

        config
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            // Environment variable override
            std::env::var("PENSIEVE_CONFIG").ok().map(PathBuf::from),
            // Standard locations
            Some(PathBuf::from("/etc/pensieve/config.toml")),
            Some(PathBuf::from("./config.toml")),
            Some(PathBuf::from("./pensieve.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // Server
        if let Ok(host) = std::env::var("PENSIEVE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PENSIEVE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        // Database
        if let Ok(url) = std::env::var("PENSIEVE_DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(max) = std::env::var("PENSIEVE_DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                self.database.max_connections = max;
            }
        }

        // Scheduler
        if let Ok(dir) = std::env::var("PENSIEVE_DATA_DIR") {
            self.scheduler.data_dir = PathBuf::from(dir);
        }
        if let Ok(schedule) = std::env::var("PENSIEVE_CLEANUP_SCHEDULE") {
            self.scheduler.cleanup_schedule = schedule;
        }

        // Logging
        if let Ok(level) = std::env::var("PENSIEVE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(dir) = std::env::var("PENSIEVE_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(dir);
        }
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_string()));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid("database.url must not be empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.scheduler.cleanup_schedule.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "scheduler.cleanup_schedule must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PensieveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8440);
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = PensieveConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = PensieveConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: PensieveConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.database.url, config.database.url);
        assert_eq!(parsed.scheduler.cleanup_schedule, config.scheduler.cleanup_schedule);
    }
}
