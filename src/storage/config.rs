//! Rider profile and application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::metrics::live::LiveMetricsConfig;
use crate::sensors::types::SensorConfig;
use crate::workouts::engine::EngineConfig;

/// The rider the app is configured for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiderProfile {
    /// Display name
    pub name: String,
    /// Functional Threshold Power in watts (50-600)
    pub ftp: Option<u16>,
}

impl Default for RiderProfile {
    fn default() -> Self {
        Self {
            name: "Cyclist".to_string(),
            ftp: None,
        }
    }
}

impl RiderProfile {
    /// Validate FTP value (50-600 watts).
    pub fn validate_ftp(ftp: u16) -> bool {
        (50..=600).contains(&ftp)
    }

    pub fn set_ftp(&mut self, ftp: u16) -> Result<(), ConfigError> {
        if !Self::validate_ftp(ftp) {
            return Err(ConfigError::InvalidValue(format!(
                "FTP must be between 50 and 600 watts, got {}",
                ftp
            )));
        }
        self.ftp = Some(ftp);
        Ok(())
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application version
    pub version: String,
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub rider: RiderProfile,
    /// Sensor settings
    pub sensors: SensorSettings,
    /// Live metric window sizes
    pub live_metrics: LiveMetricsConfig,
    /// Recording settings
    pub recording: RecordingSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::new(),
            rider: RiderProfile::default(),
            sensors: SensorSettings::default(),
            live_metrics: LiveMetricsConfig::default(),
            recording: RecordingSettings::default(),
        }
    }
}

/// Sensor-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    /// Auto-reconnect on disconnect
    pub auto_reconnect: bool,
    /// Discovery timeout in seconds
    pub discovery_timeout_secs: u32,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u32,
    /// Wait for the control point acknowledgement, in milliseconds
    pub control_ack_ms: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u32,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            discovery_timeout_secs: 30,
            connection_timeout_secs: 10,
            control_ack_ms: 100,
            max_reconnect_attempts: 3,
            reconnect_delay_secs: 2,
        }
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Minimum gap between accepted samples, in milliseconds
    pub min_sample_spacing_ms: u32,
    /// SQLite file name inside the data directory
    pub database_file: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            min_sample_spacing_ms: 900,
            database_file: "ridecontrol.db".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from the default location, falling back to defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&get_config_path())?;
        config.data_dir = get_data_dir();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: AppConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Save to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ftp) = self.rider.ftp {
            if !RiderProfile::validate_ftp(ftp) {
                return Err(ConfigError::InvalidValue(format!(
                    "FTP must be between 50 and 600 watts, got {}",
                    ftp
                )));
            }
        }
        let live = &self.live_metrics;
        if live.buffer_capacity == 0 || live.trainer_window == 0 || live.heart_rate_window == 0 {
            return Err(ConfigError::InvalidValue(
                "live metric windows must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sensor_config(&self) -> SensorConfig {
        let s = &self.sensors;
        SensorConfig {
            discovery_timeout: Duration::from_secs(s.discovery_timeout_secs as u64),
            connection_timeout: Duration::from_secs(s.connection_timeout_secs as u64),
            control_ack_timeout: Duration::from_millis(s.control_ack_ms as u64),
            auto_reconnect: s.auto_reconnect,
            max_reconnect_attempts: s.max_reconnect_attempts,
            reconnect_delay: Duration::from_secs(s.reconnect_delay_secs as u64),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            ftp: self.rider.ftp,
            min_sample_spacing: Duration::from_millis(self.recording.min_sample_spacing_ms as u64),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        let dir = if self.data_dir.as_os_str().is_empty() {
            get_data_dir()
        } else {
            self.data_dir.clone()
        };
        dir.join(&self.recording.database_file)
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "ridecontrol", "RideControl")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
