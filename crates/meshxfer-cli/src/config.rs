//! On-disk configuration for the `meshxfer` binary: transfer knobs
//! that rarely change between invocations, loaded from a TOML dotfile
//! and overridable by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_bind_addr() -> String {
    "0.0.0.0:15820".to_string()
}

fn default_pod_bind_addr() -> String {
    "127.0.0.1:15820".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_handshake_timeout_secs() -> u64 {
    60
}

fn default_completion_wait_secs() -> u64 {
    120
}

fn default_lock_stale_after_hours() -> i64 {
    24
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".venv".to_string(),
        "venv".to_string(),
        "__pycache__".to_string(),
        ".git".to_string(),
        "node_modules".to_string(),
        "target".to_string(),
        ".DS_Store".to_string(),
    ]
}

fn default_compress() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_pod_bind_addr")]
    pub pod_bind_addr: String,
    #[serde(default)]
    pub pod_mode: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_completion_wait_secs")]
    pub completion_wait_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            pod_bind_addr: default_pod_bind_addr(),
            pod_mode: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            completion_wait_secs: default_completion_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_lock_stale_after_hours")]
    pub lock_stale_after_hours: i64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            compress: default_compress(),
            exclude_patterns: default_exclude_patterns(),
            lock_stale_after_hours: default_lock_stale_after_hours(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse
    /// as valid TOML.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to an explicit path, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("meshxfer/config.toml")
    }

    /// Load from the default dotfile path, writing a fresh default
    /// file the first time there isn't one.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Resolve the bind address to use, honoring pod mode.
    #[must_use]
    pub fn bind_addr(&self) -> &str {
        if self.network.pod_mode {
            &self.network.pod_bind_addr
        } else {
            &self.network.bind_addr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.network.bind_addr, config.network.bind_addr);
        assert_eq!(back.transfer.exclude_patterns, config.transfer.exclude_patterns);
    }

    #[test]
    fn pod_mode_switches_bind_addr() {
        let mut config = Config::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:15820");
        config.network.pod_mode = true;
        assert_eq!(config.bind_addr(), "127.0.0.1:15820");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str("[network]\npod_mode = true\n").unwrap();
        assert!(config.network.pod_mode);
        assert_eq!(config.network.bind_addr, default_bind_addr());
        assert!(config.transfer.compress);
    }
}
