//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::Deserialize;
use serde::de::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::gps::FixQuality;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub gps: GpsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Window spent draining unsolicited modem lines each maintenance tick
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Default per-command timeout
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

/// GPS tracker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GpsConfig {
    /// Seconds between location polls
    #[serde(default = "default_gps_poll_interval_s")]
    pub gps_poll_interval_s: u64,

    /// Minimum acceptable fix quality ("2d" or "3d")
    #[serde(default = "default_min_fix_quality")]
    pub min_fix_quality: String,
}

/// Cellular network configuration
#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    #[serde(default = "default_apn")]
    pub apn: String,

    /// Initial session retry backoff in seconds
    #[serde(default = "default_backoff_initial_s")]
    pub backoff_initial_s: u64,

    /// Backoff cap in seconds
    #[serde(default = "default_backoff_cap_s")]
    pub backoff_cap_s: u64,
}

/// Upload queue and collector configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_device_id")]
    pub device_id: u32,

    #[serde(default = "default_upload_batch_size")]
    pub upload_batch_size: usize,

    #[serde(default = "default_max_queue_entries")]
    pub max_queue_entries: usize,

    /// Entries failing more than this many upload attempts are dropped
    #[serde(default = "default_max_attempt_count")]
    pub max_attempt_count: u32,

    /// Seconds between drain cycles
    #[serde(default = "default_drain_interval_s")]
    pub drain_interval_s: u64,

    /// Queue depth above which the indicator blinks a backlog; zero means
    /// any pending entry counts as backlog
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,
}

// Default value functions
fn default_baud_rate() -> u32 { 115_200 }
fn default_read_timeout_ms() -> u64 { 200 }
fn default_command_timeout_ms() -> u64 { 2000 }

fn default_gps_poll_interval_s() -> u64 { 10 }
fn default_min_fix_quality() -> String { "2d".to_string() }

fn default_apn() -> String { "internet".to_string() }
fn default_backoff_initial_s() -> u64 { 5 }
fn default_backoff_cap_s() -> u64 { 300 }

fn default_endpoint() -> String { "http://collector.example.com/api/v1/locations".to_string() }
fn default_device_id() -> u32 { 0 }
fn default_upload_batch_size() -> usize { 16 }
fn default_max_queue_entries() -> usize { 1024 }
fn default_max_attempt_count() -> u32 { 5 }
fn default_drain_interval_s() -> u64 { 15 }
fn default_backlog_threshold() -> usize { 0 }

impl Default for SerialConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty serial config must deserialize")
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty gps config must deserialize")
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty network config must deserialize")
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        toml::from_str("").expect("empty upload config must deserialize")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            gps: GpsConfig::default(),
            network: NetworkConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("baud_rate must be greater than 0")
            ));
        }

        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms > 10_000 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("read_timeout_ms must be between 1 and 10000")
            ));
        }

        if self.serial.command_timeout_ms == 0 || self.serial.command_timeout_ms > 120_000 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("command_timeout_ms must be between 1 and 120000")
            ));
        }

        if self.gps.gps_poll_interval_s == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("gps_poll_interval_s must be greater than 0")
            ));
        }

        if self.min_fix_quality().is_none() {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("min_fix_quality must be \"2d\" or \"3d\"")
            ));
        }

        if self.network.backoff_initial_s == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("backoff_initial_s must be greater than 0")
            ));
        }

        if self.network.backoff_cap_s < self.network.backoff_initial_s {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("backoff_cap_s must be at least backoff_initial_s")
            ));
        }

        if self.upload.endpoint.is_empty() {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("endpoint cannot be empty")
            ));
        }

        if self.upload.upload_batch_size == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("upload_batch_size must be greater than 0")
            ));
        }

        if self.upload.max_queue_entries == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("max_queue_entries must be greater than 0")
            ));
        }

        if self.upload.max_attempt_count == 0 {
            return Err(crate::error::BikeBeaconError::Config(
                toml::de::Error::custom("max_attempt_count must be greater than 0")
            ));
        }

        Ok(())
    }

    /// Parsed minimum fix quality, or `None` if the string is unrecognized
    pub fn min_fix_quality(&self) -> Option<FixQuality> {
        match self.gps.min_fix_quality.as_str() {
            "2d" => Some(FixQuality::Fix2d),
            "3d" => Some(FixQuality::Fix3d),
            _ => None,
        }
    }

    /// Initial session retry backoff
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_secs(self.network.backoff_initial_s)
    }

    /// Session retry backoff cap
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.network.backoff_cap_s)
    }

    /// Default per-command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.serial.command_timeout_ms)
    }
}
