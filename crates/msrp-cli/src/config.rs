//! Configuration file for the MSRP CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use msrp_core::codec::DEFAULT_MAX_FRAME_SIZE;
use msrp_core::config::duration_ms;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Protocol settings handed to the core
    #[serde(default)]
    pub msrp: msrp_core::Config,
    /// Socket settings
    #[serde(default)]
    pub network: NetworkConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Socket read size in bytes
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    /// Largest frame accepted from the peer
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// How often to look for the SDP file written by the other side
    #[serde(default = "default_sdp_poll_interval", with = "duration_ms")]
    pub sdp_poll_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_buffer() -> usize {
    16 * 1024
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_sdp_poll_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            read_buffer: default_read_buffer(),
            max_frame_size: default_max_frame_size(),
            sdp_poll_interval: default_sdp_poll_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("msrp/config.toml")
    }

    /// Load config from the default path, falling back to defaults if the
    /// file does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.msrp.validate().context("invalid [msrp] settings")?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        if self.network.read_buffer == 0 {
            anyhow::bail!("read_buffer must be non-zero");
        }

        // Room for the chunk plus its headers
        if self.network.max_frame_size < self.msrp.chunk_size + 1024 {
            anyhow::bail!(
                "max_frame_size ({}) too small for chunk_size {}",
                self.network.max_frame_size,
                self.msrp.chunk_size
            );
        }

        if self.network.connect_timeout.is_zero() || self.network.sdp_poll_interval.is_zero() {
            anyhow::bail!("network timeouts must be non-zero");
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
        assert_eq!(config.msrp.chunk_size, 2048);
        assert_eq!(config.network.read_buffer, 16 * 1024);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.msrp.chunk_size = 0;
        assert!(config.validate().is_err());

        config.msrp.chunk_size = 8 * 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [msrp]
            chunk_size = 4096
            relay = "msrps://relay.example.com;tcp"

            [logging]
            level = "warn"
            "#,
        )
        .unwrap();
        assert_eq!(config.msrp.chunk_size, 4096);
        assert_eq!(config.msrp.relay.as_deref(), Some("msrps://relay.example.com;tcp"));
        assert_eq!(config.network.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = Config::default();
        config.msrp.accept_types = vec!["text/plain".into(), "image/*".into()];
        config.network.connect_timeout = Duration::from_millis(1500);
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.msrp, config.msrp);
        assert_eq!(loaded.network.connect_timeout, Duration::from_millis(1500));
    }
}
