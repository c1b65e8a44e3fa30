//! Recorded timeline, workout records and summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One recorded second of a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSample {
    /// Wall-clock time the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Active seconds since the session started
    pub elapsed_seconds: u32,
    /// Instantaneous power in watts
    pub power_watts: i16,
    /// Cadence in RPM
    pub cadence_rpm: f64,
    /// Heart rate in BPM
    pub heart_rate_bpm: Option<u16>,
    /// Speed in km/h
    pub speed_kmh: f64,
    /// ERG target in effect when the sample was taken
    pub target_power: Option<u16>,
}

/// Figures derived from a timeline when a session stops.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkoutSummary {
    /// Active riding time in seconds
    pub duration_seconds: u32,
    /// Integral of speed over the timeline
    pub distance_km: f64,
    pub avg_power: f64,
    pub max_power: i16,
    pub normalized_power: Option<f64>,
    pub avg_heart_rate: Option<f64>,
    pub max_heart_rate: Option<u16>,
    pub avg_cadence: f64,
    pub max_cadence: f64,
    /// Training Stress Score
    pub tss: Option<f64>,
    /// Intensity Factor (NP / FTP)
    pub intensity_factor: Option<f64>,
}

/// A finished ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    /// Assigned by the store
    pub id: Option<i64>,
    /// Template the ride followed, if any
    pub template_id: Option<i64>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub samples: Vec<WorkoutSample>,
    pub summary: WorkoutSummary,
}

impl WorkoutRecord {
    pub fn has_heart_rate(&self) -> bool {
        self.samples.iter().any(|s| s.heart_rate_bpm.is_some())
    }
}

/// Errors during TCX or ZWO export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No samples to export
    #[error("Workout has no data to export")]
    NoData,

    /// XML generation error
    #[error("XML error: {0}")]
    XmlError(String),

    /// Absolute targets need an FTP to become fractions
    #[error("FTP required to export absolute power targets")]
    FtpRequired,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
