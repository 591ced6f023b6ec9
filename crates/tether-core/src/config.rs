use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Data directory path
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Host to bind the listener to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Explicit port. When unset the first free port in the range is used
    #[serde(default)]
    pub port: Option<u16>,
    /// First port of the scan range (inclusive)
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    /// End of the scan range (exclusive)
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
    /// Receive timeout in seconds for the listener loop, unset blocks indefinitely
    #[serde(default)]
    pub recv_timeout_secs: Option<u64>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: None,
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
            recv_timeout_secs: None,
        }
    }
}

impl ListenerConfig {
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage backend: "file" or "memory"
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Save persisted fields at most this often
    #[serde(default = "default_save_interval")]
    pub save_interval_secs: u64,
    /// How often the scheduler checks whether a save is due
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Backend specific parameters (e.g. `path` for the file backend)
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            save_interval_secs: default_save_interval(),
            poll_interval_secs: default_poll_interval(),
            options: BTreeMap::new(),
        }
    }
}

impl PersistenceConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tether")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port_range_start() -> u16 {
    51000
}

fn default_port_range_end() -> u16 {
    51100
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_save_interval() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    5
}

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &std::path::Path) -> PathBuf {
    if let Some(path_str) = path.to_str() {
        if let Some(stripped) = path_str.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if path_str == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

impl AppConfig {
    /// Load configuration from file or return defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Get the configuration file path
    /// Always uses ~/.config/tether/config.toml on all platforms
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tether")
            .join("config.toml")
    }

    /// Get the data directory (with tilde expansion)
    pub fn data_dir(&self) -> PathBuf {
        expand_tilde(&self.general.data_dir)
    }

    /// Default file for a daemon's persisted fields
    pub fn persistence_path(&self, daemon_name: &str) -> PathBuf {
        match self.persistence.option("path") {
            Some(path) => expand_tilde(std::path::Path::new(path)),
            None => self.data_dir().join(format!("{}.pst.json", daemon_name)),
        }
    }
}
