//! Configuration management for PeerLink.
//!
//! This module handles loading, saving, and validating PeerLink configuration.
//! Components never read configuration globally; each one is handed the
//! section it needs when it is constructed.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/peerlink/config.toml` |
//! | macOS | `~/Library/Application Support/com.peerlink.PeerLink/config.toml` |
//! | Windows | `%APPDATA%\PeerLink\PeerLink\config\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use peerlink_core::config::Config;
//!
//! let config = Config::load()?;
//! config.validate()?;
//! println!("Sharing {}", config.server.shared_dir.display());
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryConfig;
use crate::error::{Error, Result};

/// Main configuration struct for PeerLink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network settings
    pub network: NetworkConfig,
    /// Peer listener settings
    pub server: ServerConfig,
    /// Outbound client settings
    pub client: ClientConfig,
    /// File catalog settings
    pub catalog: CatalogConfig,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Discovery port (UDP)
    pub discovery_port: u16,
    /// Timeout for establishing outbound connections
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long discovery collects replies
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
    /// Destination of discovery requests
    pub broadcast_address: IpAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            discovery_port: crate::DEFAULT_DISCOVERY_PORT,
            connect_timeout: crate::DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: crate::DEFAULT_DISCOVERY_TIMEOUT,
            broadcast_address: IpAddr::V4(Ipv4Addr::BROADCAST),
        }
    }
}

/// Peer listener configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_address: IpAddr,
    /// Listening port (TCP); 0 picks an ephemeral port
    pub listen_port: u16,
    /// Folder whose files are listed and counted
    pub shared_dir: PathBuf,
    /// Maximum connections served concurrently
    pub worker_pool_size: usize,
    /// How long `stop` waits for in-flight connections
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
    /// Close connections that send nothing for this long
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: crate::DEFAULT_LISTEN_PORT,
            shared_dir: PathBuf::from("shared_files"),
            worker_pool_size: crate::DEFAULT_WORKER_POOL_SIZE,
            shutdown_grace: crate::DEFAULT_SHUTDOWN_GRACE,
            idle_timeout: None,
        }
    }
}

/// Outbound client configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Folder downloads are written to
    pub download_dir: PathBuf,
    /// Name sent in `HELLO`
    pub peer_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            peer_name: hostname::get().map_or_else(
                |_| "PeerLink Peer".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
        }
    }
}

/// File catalog configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON catalog file; the default data directory is used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check values that would make a component unusable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.server.worker_pool_size == 0 {
            return Err(Error::InvalidConfig {
                key: "server.worker_pool_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.server.listen_port != 0 && self.network.discovery_port == self.server.listen_port {
            return Err(Error::InvalidConfig {
                key: "network.discovery_port".to_string(),
                reason: format!(
                    "must differ from server.listen_port ({})",
                    self.server.listen_port
                ),
            });
        }

        Ok(())
    }

    /// Discovery settings derived from the network and server sections.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            port: self.network.discovery_port,
            broadcast_address: self.network.broadcast_address,
            timeout: self.network.discovery_timeout,
        }
    }

    /// Catalog file in use: the configured path or the default location.
    #[must_use]
    pub fn catalog_path(&self) -> Option<PathBuf> {
        self.catalog
            .path
            .clone()
            .or_else(crate::catalog::CatalogStore::default_path)
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "peerlink", "PeerLink")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

/// Durations as `"<n>ms"`, `"<n>s"`, `"<n>m"` or `"<n>h"` strings.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn format_duration(duration: Duration) -> String {
        let secs = duration.as_secs();
        if duration.subsec_nanos() != 0 {
            format!("{}ms", duration.as_millis())
        } else if secs >= 60 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let (digits, millis_per_unit) = if let Some(ms) = s.strip_suffix("ms") {
            (ms, 1)
        } else if let Some(secs) = s.strip_suffix('s') {
            (secs, 1_000)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60_000)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3_600_000)
        } else {
            return Err(format!("invalid duration format '{s}'"));
        };

        let n = digits
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))?;

        n.checked_mul(millis_per_unit)
            .map(Duration::from_millis)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| super::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.listen_port, crate::DEFAULT_LISTEN_PORT);
        assert_eq!(config.network.discovery_port, crate::DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.server.worker_pool_size, 10);
        assert_eq!(config.network.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.network.discovery_timeout, Duration::from_secs(3));
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(5));
        assert!(config.server.idle_timeout.is_none());
        assert_eq!(config.server.shared_dir, PathBuf::from("shared_files"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config").join("config.toml");

        let mut original = Config::default();
        original.client.peer_name = "Test Peer".to_string();
        original.server.listen_port = 9100;
        original.server.idle_timeout = Some(Duration::from_secs(120));
        original.catalog.path = Some(PathBuf::from("/tmp/catalog.json"));
        original.save_to(&config_path).expect("save");

        let loaded = Config::load_from(&config_path).expect("load");

        assert_eq!(loaded.client.peer_name, "Test Peer");
        assert_eq!(loaded.server.listen_port, 9100);
        assert_eq!(loaded.server.idle_timeout, Some(Duration::from_secs(120)));
        assert_eq!(loaded.catalog.path, Some(PathBuf::from("/tmp/catalog.json")));
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("serialize");

        assert!(toml_str.contains("[network]"), "Should have [network] section");
        assert!(toml_str.contains("[server]"), "Should have [server] section");
        assert!(toml_str.contains("[client]"), "Should have [client] section");
        assert!(toml_str.contains("connect_timeout = \"5s\""));
        assert!(!toml_str.contains("idle_timeout"));
    }

    #[test]
    fn test_config_deserialization_partial() {
        let partial_toml = r#"
[server]
listen_port = 9000
shutdown_grace = "2m"
idle_timeout = "30s"

[network]
broadcast_address = "192.168.1.255"
"#;

        let config: Config = toml::from_str(partial_toml).expect("parse partial config");

        assert_eq!(config.server.listen_port, 9000);
        assert_eq!(config.server.shutdown_grace, Duration::from_secs(120));
        assert_eq!(config.server.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(
            config.network.broadcast_address,
            "192.168.1.255".parse::<IpAddr>().unwrap()
        );

        assert_eq!(config.network.discovery_port, crate::DEFAULT_DISCOVERY_PORT);
        assert_eq!(config.server.worker_pool_size, crate::DEFAULT_WORKER_POOL_SIZE);
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("[network]\nconnect_timeout = \"soon\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_subsecond_durations_survive_save() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut original = Config::default();
        original.server.shutdown_grace = Duration::from_millis(500);
        original.network.connect_timeout = Duration::from_millis(1500);
        original.save_to(&config_path).expect("save");

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("shutdown_grace = \"500ms\""));

        let loaded = Config::load_from(&config_path).expect("load");
        assert_eq!(loaded.server.shutdown_grace, Duration::from_millis(500));
        assert_eq!(loaded.network.connect_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(humantime_serde::parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(humantime_serde::parse_duration("2h"), Ok(Duration::from_secs(7200)));
        assert_eq!(humantime_serde::format_duration(Duration::from_secs(180)), "3m");
        assert_eq!(humantime_serde::format_duration(Duration::from_secs(90)), "90s");
        assert!(humantime_serde::parse_duration("18446744073709551615h").is_err());
        assert!(humantime_serde::parse_duration("5x").is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_from(&temp_dir.path().join("absent.toml")).expect("load");
        assert_eq!(config.server.listen_port, crate::DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_load_malformed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[server\nlisten_port = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert_eq!(err.reason(), "CONFIG_ERROR");
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = Config::default();
        config.server.worker_pool_size = 0;

        match config.validate() {
            Err(Error::InvalidConfig { key, .. }) => assert_eq!(key, "server.worker_pool_size"),
            other => panic!("Expected InvalidConfig, got: {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_port_clash() {
        let mut config = Config::default();
        config.network.discovery_port = config.server.listen_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discovery_config() {
        let mut config = Config::default();
        config.network.discovery_port = 9999;
        let discovery = config.discovery_config();
        assert_eq!(discovery.port, 9999);
        assert_eq!(discovery.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(
            path.ends_with("config.toml"),
            "Config path should end with config.toml"
        );
    }
}
