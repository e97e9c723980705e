/// Configuration management for grupo

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::core::NamingStyle;
use crate::replicaset::OrchestratorSettings;
use crate::utils::split_endpoint;

pub use crate::error::ConfigError;

/// Main grupo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account used on every member
    pub connection: ConnectionConfig,
    /// Where the cluster metadata lives
    pub metadata: MetadataConfig,
    /// Provisioning helper
    pub provisioning: ProvisioningConfig,
    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Administrative user, the same on every member
    pub user: String,
    /// Environment variable holding the password
    pub password_env: String,
    /// Connection timeout in seconds
    pub connect_timeout_sec: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Instance hosting the metadata schema (`host:port`)
    pub endpoint: String,
    pub replicaset_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Path of the provisioning helper
    pub helper_path: String,
    /// Binary running the helper (optional)
    pub interpreter: Option<String>,
    /// Helper verbosity
    #[serde(default)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How command names appear in messages (camel, snake)
    pub naming_style: String,
    /// Skip members refusing the connection while updating peers
    pub tolerate_connection_refused: bool,
    /// Pause after persisting `enforce_gtid_consistency`, in milliseconds
    pub persist_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
    /// Log to stdout
    pub stdout: bool,
    /// Log file path (optional)
    pub file: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            naming_style: NamingStyle::default().to_string(),
            tolerate_connection_refused: false,
            persist_delay_ms: 1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                user: "clusteradmin".to_string(),
                password_env: "GRUPO_PASSWORD".to_string(),
                connect_timeout_sec: 10,
            },
            metadata: MetadataConfig {
                endpoint: "127.0.0.1:3306".to_string(),
                replicaset_id: 1,
            },
            provisioning: ProvisioningConfig {
                helper_path: "/usr/share/mysqlsh/mysqlprovision.zip".to_string(),
                interpreter: Some("mysqlsh".to_string()),
                verbose: 0,
            },
            orchestrator: OrchestratorConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
                stdout: true,
                file: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.user.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connection user cannot be empty".to_string(),
            ));
        }

        if self.connection.connect_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.metadata.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "metadata endpoint cannot be empty".to_string(),
            ));
        }
        split_endpoint(&self.metadata.endpoint).map_err(|_| {
            ConfigError::ValidationError(format!(
                "Invalid metadata endpoint: {}",
                self.metadata.endpoint
            ))
        })?;

        if self.provisioning.helper_path.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provisioning helper_path cannot be empty".to_string(),
            ));
        }

        self.naming_style()?;

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    pub fn naming_style(&self) -> Result<NamingStyle, ConfigError> {
        self.orchestrator
            .naming_style
            .parse()
            .map_err(ConfigError::ValidationError)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.connect_timeout_sec)
    }

    /// Password from the configured environment variable
    pub fn password(&self) -> Result<String, ConfigError> {
        std::env::var(&self.connection.password_env).map_err(|_| {
            ConfigError::ValidationError(format!(
                "environment variable {} is not set",
                self.connection.password_env
            ))
        })
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        Ok(OrchestratorSettings {
            naming_style: self.naming_style()?,
            tolerate_connection_refused: self.orchestrator.tolerate_connection_refused,
            persist_delay: Duration::from_millis(self.orchestrator.persist_delay_ms),
        })
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            metadata: MetadataConfig {
                endpoint: "10.0.0.11:3306".to_string(),
                replicaset_id: 1,
            },
            logging: LoggingConfig {
                file: Some("/var/log/grupo.log".to_string()),
                ..Config::default().logging
            },
            ..Default::default()
        };

        config.save_to_file(path)
    }
}
