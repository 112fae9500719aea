//! Configuration management module.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::profile::DataPoints;
use crate::tuya::{DEFAULT_PORT, DeviceIdentity, ProtocolVersion, RetryPolicy};

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device endpoint, credentials and data-point profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub address: String,
    /// Local TCP port (default: 6668).
    #[serde(default = "default_port")]
    pub port: u16,
    /// "3.1" or "3.3" (default: 3.3).
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    pub device_id: String,
    /// Defaults to `device_id`.
    #[serde(default)]
    pub gateway_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    pub local_key: String,
    /// Built-in data-point profile (default: generic).
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Custom data-point table, overrides `profile`.
    #[serde(default)]
    pub data_points: Option<DataPoints>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_protocol_version() -> String {
    ProtocolVersion::V33.as_str().to_string()
}

fn default_profile() -> String {
    "generic".to_string()
}

/// Reconnect and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt connect timeout; 0 disables it.
    pub connect_timeout_secs: u64,
    /// Response read timeout; 0 disables it.
    pub read_timeout_secs: u64,
    /// Unset means retry until the device answers.
    pub max_attempts: Option<u32>,
    /// Bound on a whole command, retries included.
    pub deadline_secs: Option<u64>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is not set.
    pub level: String,
    /// Also write daily log files into this directory.
    pub directory: Option<PathBuf>,
}

impl AppConfig {
    /// Get config file path (per-user config directory).
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "tuya-lan")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.address.trim().is_empty() {
            return Err(ConfigError::Validation("Device address cannot be empty".to_string()));
        }
        if self.device.port == 0 {
            return Err(ConfigError::Validation("Device port must be greater than 0".to_string()));
        }
        if self.device.device_id.trim().is_empty() {
            return Err(ConfigError::Validation("Device ID cannot be empty".to_string()));
        }
        if self.device.data_points.is_none() && DataPoints::builtin(&self.device.profile).is_none() {
            return Err(ConfigError::Validation(format!(
                "Unknown profile `{}` (expected one of: {})",
                self.device.profile,
                DataPoints::builtin_names().join(", ")
            )));
        }
        if self.connection.initial_backoff_ms == 0 {
            return Err(ConfigError::Validation(
                "Initial backoff must be at least 1 ms".to_string(),
            ));
        }
        if self.connection.max_backoff_ms < self.connection.initial_backoff_ms {
            return Err(ConfigError::Validation(
                "Max backoff cannot be smaller than initial backoff".to_string(),
            ));
        }
        if self.connection.max_attempts == Some(0) {
            return Err(ConfigError::Validation("Max attempts must be at least 1".to_string()));
        }
        if self.connection.deadline_secs == Some(0) {
            return Err(ConfigError::Validation("Deadline must be at least 1 second".to_string()));
        }
        // Version and key checks live in DeviceIdentity
        self.identity()?;
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build the immutable device identity.
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        let device = &self.device;
        let mut identity = DeviceIdentity::new(
            &device.address,
            &device.protocol_version,
            &device.device_id,
            &device.local_key,
        )
        .map_err(|e| ConfigError::Validation(e.to_string()))?
        .with_port(device.port);

        if let Some(gateway_id) = &device.gateway_id {
            identity = identity.with_gateway_id(gateway_id);
        }
        if let Some(product_id) = &device.product_id {
            identity = identity.with_product_id(product_id);
        }
        if let Some(name) = &device.name {
            identity = identity.with_name(name);
        }
        Ok(identity)
    }

    /// Data-point table: the custom one if present, else the named built-in.
    pub fn data_points(&self) -> Result<DataPoints, ConfigError> {
        if let Some(points) = &self.device.data_points {
            return Ok(points.clone());
        }
        DataPoints::builtin(&self.device.profile)
            .ok_or_else(|| ConfigError::Validation(format!("Unknown profile `{}`", self.device.profile)))
    }
}

impl ConnectionConfig {
    /// Retry policy for the transport.
    pub fn retry_policy(&self) -> RetryPolicy {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            connect_timeout: secs(self.connect_timeout_secs),
            read_timeout: secs(self.read_timeout_secs),
            max_attempts: self.max_attempts,
            deadline: self.deadline_secs.map(Duration::from_secs),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: None,
            address: "192.168.0.106".to_string(),
            port: default_port(),
            protocol_version: default_protocol_version(),
            device_id: String::new(),
            gateway_id: None,
            product_id: None,
            local_key: String::new(),
            profile: default_profile(),
            data_points: None,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            connect_timeout_secs: 5,
            read_timeout_secs: 10,
            max_attempts: None,
            deadline_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}
