//! Sensor types shared by the trainer and heart-rate sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Class of sensor a device session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    /// Smart trainer exposing the Fitness Machine Service
    Trainer,
    /// Heart rate strap exposing the Heart Rate Service
    HeartRate,
}

impl std::fmt::Display for SensorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorType::Trainer => write!(f, "Smart Trainer"),
            SensorType::HeartRate => write!(f, "Heart Rate"),
        }
    }
}

/// Connection state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Active connection
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// Identity of the physical device behind a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Opaque transport identifier
    pub id: String,
    /// Advertised name
    pub name: String,
}

/// One decoded Indoor Bike Data notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerFrame {
    /// Instantaneous speed in km/h (0 when absent)
    pub speed_kmh: f64,
    /// Instantaneous cadence in RPM (0 when absent)
    pub cadence_rpm: f64,
    /// Instantaneous power in watts (0 when absent)
    pub power_watts: i16,
    /// Heart rate relayed by the trainer
    pub heart_rate_bpm: Option<u8>,
    /// When the notification was received
    pub timestamp: DateTime<Utc>,
}

/// One decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateFrame {
    pub heart_rate_bpm: u16,
    /// True only when the strap supports contact detection and reports skin contact
    pub contact_detected: bool,
    pub timestamp: DateTime<Utc>,
}

/// Events a device session pushes onto its channel.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    /// Session connection state changed
    ConnectionChanged {
        sensor: SensorType,
        state: ConnectionState,
    },
    /// New trainer telemetry
    Trainer(TrainerFrame),
    /// New heart rate telemetry
    HeartRate(HeartRateFrame),
}

/// Timing knobs for device sessions.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// How long device selection may scan before giving up
    pub discovery_timeout: Duration,
    /// Timeout for the link-level connect
    pub connection_timeout: Duration,
    /// Bounded wait for the control point acknowledgement
    pub control_ack_timeout: Duration,
    /// Whether to reconnect after unsolicited link loss
    pub auto_reconnect: bool,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
    /// Delay between reconnection attempts
    pub reconnect_delay: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            control_ack_timeout: Duration::from_millis(100),
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Errors that can occur in the sensor layer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensorError {
    /// No compatible sensor found, selected, or discoverable
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Unsolicited disconnection
    #[error("Link lost: {0}")]
    LinkLost(String),

    /// Telemetry buffer shorter than its own flags demand
    #[error("Malformed frame: {field} needs {needed} bytes, frame has {actual}")]
    MalformedFrame {
        field: &'static str,
        needed: usize,
        actual: usize,
    },

    /// Trainer did not grant control within the wait window
    #[error("Trainer did not grant control")]
    ControlDenied,

    /// Transport-level write failure
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Operation needs a connected session
    #[error("Sensor not connected")]
    NotConnected,

    /// Target outside the range the command can encode
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Generic transport error
    #[error("Transport error: {0}")]
    Transport(String),
}
