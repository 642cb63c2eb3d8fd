//! Configuration management for the distributed key-value cache
//!
//! This module provides structured configuration management using TOML/YAML
//! files with serde for serialization and deserialization.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::cluster::ring::DEFAULT_REPLICAS;

/// Errors raised while loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read or write config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to encode TOML config: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Main configuration structure for a cache node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Node addresses and seeds
    pub node: NodeConfig,
    /// Hash ring configuration
    pub ring: RingConfig,
    /// Transport and join protocol configuration
    pub transport: TransportConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the transport binds to
    pub listen_addr: String,
    /// Address other nodes should use to reach this one; defaults to the
    /// bound socket address
    pub advertise_addr: Option<String>,
    /// Nodes to join on startup
    pub seeds: Vec<String>,
}

/// Hash ring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Virtual points per physical node
    pub replicas: usize,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on join announcements in flight at once
    pub max_concurrent_broadcasts: usize,
    /// Per-RPC timeout for peer requests; none when unset
    pub rpc_timeout_ms: Option<u64>,
    /// How long close() waits for in-flight announcements before cancelling
    pub shutdown_drain_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Log format
    pub format: LogFormat,
    /// Log file path (optional); console output when unset
    pub file_path: Option<String>,
    /// Rotation of the log file
    pub rotation: LogRotationInterval,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Simple text format
    Simple,
    /// JSON format
    Json,
    /// Pretty format with colors
    Pretty,
}

/// Log rotation interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRotationInterval {
    Daily,
    Hourly,
    Never,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,
    /// Exporter bind address
    pub bind_address: String,
}

impl CacheConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CacheConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Pick the parser from the file extension (`.yaml`/`.yml` or TOML)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_file(path),
            _ => Self::from_file(path),
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Validate node config
        if self.node.listen_addr.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else {
            match self.node.listen_addr.parse::<SocketAddr>() {
                Err(_) => {
                    errors.push(format!("Invalid listen address: {}", self.node.listen_addr))
                }
                Ok(addr) if addr.ip().is_unspecified() && self.node.advertise_addr.is_none() => {
                    errors.push(format!(
                        "Wildcard listen address {} requires an advertise address",
                        self.node.listen_addr
                    ))
                }
                Ok(_) => {}
            }
        }
        if let Some(advertise) = &self.node.advertise_addr {
            if advertise.is_empty() {
                errors.push("Advertise address cannot be empty".to_string());
            }
        }
        if self.node.seeds.iter().any(|s| s.is_empty()) {
            errors.push("Seed addresses cannot be empty".to_string());
        }

        // Validate ring config
        if self.ring.replicas == 0 {
            errors.push("Ring replicas cannot be 0".to_string());
        }

        // Validate transport config
        if self.transport.max_concurrent_broadcasts == 0 {
            errors.push("Max concurrent broadcasts cannot be 0".to_string());
        }
        if self.transport.rpc_timeout_ms == Some(0) {
            errors.push("RPC timeout cannot be 0".to_string());
        }

        // Validate metrics config
        if self.metrics.enabled && self.metrics.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid metrics bind address: {}",
                self.metrics.bind_address
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate and convert the error list into a `ConfigError`
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate().map_err(ConfigError::Invalid)?;
        Ok(self)
    }
}

impl TransportConfig {
    /// Get the optional per-RPC timeout
    pub fn rpc_timeout(&self) -> Option<Duration> {
        self.rpc_timeout_ms.map(Duration::from_millis)
    }

    /// Get duration for the broadcast drain on close
    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_millis(self.shutdown_drain_ms)
    }
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7070".to_string(),
            advertise_addr: None,
            seeds: Vec::new(),
        }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            replicas: DEFAULT_REPLICAS,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_concurrent_broadcasts: 16,
            rpc_timeout_ms: None,
            shutdown_drain_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Simple,
            file_path: None,
            rotation: LogRotationInterval::Daily,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:9070".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.node.listen_addr, "127.0.0.1:7070");
        assert_eq!(config.ring.replicas, 10);
        assert_eq!(config.transport.rpc_timeout(), None);
        assert!(config.node.seeds.is_empty());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CacheConfig::default();
        assert!(config.validate().is_ok());

        // Test invalid config
        config.ring.replicas = 0;
        config.node.listen_addr = "not-an-address".to_string();
        config.transport.rpc_timeout_ms = Some(0);
        let errors = config.validate().unwrap_err();
        assert!(errors.contains(&"Ring replicas cannot be 0".to_string()));
        assert!(errors.contains(&"Invalid listen address: not-an-address".to_string()));
        assert!(errors.contains(&"RPC timeout cannot be 0".to_string()));

        assert!(matches!(config.validated(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_wildcard_listen_needs_advertise_address() {
        let mut config = CacheConfig::default();
        config.node.listen_addr = "0.0.0.0:7070".to_string();
        let errors = config.validate().unwrap_err();
        assert_eq!(
            errors,
            vec!["Wildcard listen address 0.0.0.0:7070 requires an advertise address".to_string()]
        );

        config.node.advertise_addr = Some("cache-1.internal:7070".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            [node]
            listen_addr = "0.0.0.0:9000"
            seeds = ["10.0.0.2:9000"]

            [transport]
            rpc_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.node.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.node.seeds, vec!["10.0.0.2:9000".to_string()]);
        assert_eq!(config.ring.replicas, 10);
        assert_eq!(config.transport.max_concurrent_broadcasts, 16);
        assert_eq!(config.transport.rpc_timeout(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CacheConfig::default();
        config.ring.replicas = 32;
        config.node.advertise_addr = Some("cache-1.internal:7070".to_string());

        let toml_path = dir.path().join("node.toml");
        config.save_to_file(&toml_path).unwrap();
        let loaded = CacheConfig::load(&toml_path).unwrap();
        assert_eq!(loaded.ring.replicas, 32);
        assert_eq!(loaded.node.advertise_addr.as_deref(), Some("cache-1.internal:7070"));

        let yaml_path = dir.path().join("node.yaml");
        config.save_to_yaml_file(&yaml_path).unwrap();
        let loaded = CacheConfig::load(&yaml_path).unwrap();
        assert_eq!(loaded.ring.replicas, 32);
        assert_eq!(loaded.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_missing_file() {
        let result = CacheConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
