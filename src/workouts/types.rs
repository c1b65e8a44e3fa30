//! Workout templates, intervals and session status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Power target of an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerTarget {
    /// Fixed wattage target
    Absolute { watts: u16 },
    /// Percentage of the rider's FTP
    PercentFtp { percent: u16 },
}

impl PowerTarget {
    pub fn absolute(watts: u16) -> Self {
        PowerTarget::Absolute { watts }
    }

    pub fn percent_ftp(percent: u16) -> Self {
        PowerTarget::PercentFtp { percent }
    }

    /// Wattage for a given FTP. Percentage targets need one.
    pub fn to_watts(&self, ftp: Option<u16>) -> Option<u16> {
        match *self {
            PowerTarget::Absolute { watts } => Some(watts),
            PowerTarget::PercentFtp { percent } => {
                ftp.map(|ftp| (f64::from(ftp) * f64::from(percent) / 100.0).round() as u16)
            }
        }
    }

    /// Target as a fraction of FTP.
    pub fn to_ftp_fraction(&self, ftp: Option<u16>) -> Option<f64> {
        match *self {
            PowerTarget::PercentFtp { percent } => Some(f64::from(percent) / 100.0),
            PowerTarget::Absolute { watts } => ftp
                .filter(|&f| f > 0)
                .map(|f| f64::from(watts) / f64::from(f)),
        }
    }

    /// An absolute zero target means "no ERG", as in a free ride block.
    pub fn is_free_ride(&self) -> bool {
        matches!(self, PowerTarget::Absolute { watts: 0 })
    }
}

impl std::fmt::Display for PowerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PowerTarget::Absolute { watts: 0 } => write!(f, "free"),
            PowerTarget::Absolute { watts } => write!(f, "{}W", watts),
            PowerTarget::PercentFtp { percent } => write!(f, "{}% FTP", percent),
        }
    }
}

/// Cadence band in RPM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceTarget {
    pub min_rpm: u16,
    pub max_rpm: u16,
}

/// One block of a structured workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutInterval {
    pub id: String,
    pub name: String,
    /// Duration in seconds, always > 0
    pub duration_seconds: u32,
    pub target: PowerTarget,
    pub cadence: Option<CadenceTarget>,
}

impl WorkoutInterval {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        duration_seconds: u32,
        target: PowerTarget,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            duration_seconds,
            target,
            cadence: None,
        }
    }

    pub fn with_cadence(mut self, min_rpm: u16, max_rpm: u16) -> Self {
        self.cadence = Some(CadenceTarget { min_rpm, max_rpm });
        self
    }
}

/// An ordered list of intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    /// Assigned by the store
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    pub intervals: Vec<WorkoutInterval>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkoutTemplate {
    /// Build a template, rejecting zero-length intervals.
    pub fn new(name: impl Into<String>, intervals: Vec<WorkoutInterval>) -> Result<Self, WorkoutError> {
        if let Some(bad) = intervals.iter().find(|i| i.duration_seconds == 0) {
            return Err(WorkoutError::InvalidWorkout(format!(
                "interval '{}' has zero duration",
                bad.name
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: None,
            name: name.into(),
            description: None,
            intervals,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sum of interval durations, saturating at `u32::MAX`.
    pub fn total_duration_seconds(&self) -> u32 {
        self.intervals
            .iter()
            .fold(0u32, |total, i| total.saturating_add(i.duration_seconds))
    }
}

/// State of the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Running => write!(f, "Running"),
            SessionStatus::Paused => write!(f, "Paused"),
            SessionStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Errors related to workout operations.
#[derive(Debug, Error)]
pub enum WorkoutError {
    /// Operation not allowed in the current state
    #[error("Cannot {action} while {status}")]
    InvalidTransition {
        action: &'static str,
        status: SessionStatus,
    },

    /// Invalid workout structure
    #[error("Invalid workout: {0}")]
    InvalidWorkout(String),

    /// Workout parsing failed
    #[error("Failed to parse workout: {0}")]
    ParseError(#[from] WorkoutParseError),
}

/// Errors during workout file parsing.
#[derive(Debug, Error)]
pub enum WorkoutParseError {
    /// Invalid XML structure
    #[error("Invalid XML: {0}")]
    InvalidXml(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Empty workout (no intervals)
    #[error("Workout has no intervals")]
    EmptyWorkout,

    /// IO error reading file
    #[error("IO error: {0}")]
    IoError(String),
}
