//! Live metrics aggregation over rolling sample buffers.
//!
//! Short-window averages are taken over the most recent N *samples*, not a
//! wall-clock span. With the defaults (12 trainer samples, 3 heart rate
//! samples) they approximate 3 s only at ~4 Hz and ~1 Hz notification rates.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::sensors::types::{HeartRateFrame, TrainerFrame};

/// Fixed-capacity FIFO buffer of recent values.
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    buffer: VecDeque<f64>,
    capacity: usize,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest once full.
    pub fn push(&mut self, value: f64) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    /// Mean of the most recent `window` values; 0 when empty.
    pub fn recent_average(&self, window: usize) -> f64 {
        let take = window.min(self.buffer.len());
        if take == 0 {
            return 0.0;
        }
        let sum: f64 = self.buffer.iter().rev().take(take).sum();
        sum / take as f64
    }

    pub fn latest(&self) -> Option<f64> {
        self.buffer.back().copied()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.buffer.iter()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Buffer sizes and short-window lengths, all in samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMetricsConfig {
    pub buffer_capacity: usize,
    /// Window for power and cadence averages
    pub trainer_window: usize,
    /// Window for the heart rate average
    pub heart_rate_window: usize,
}

impl Default for LiveMetricsConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 30,
            trainer_window: 12,
            heart_rate_window: 3,
        }
    }
}

/// Instantaneous values handed to the session engine once per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleReading {
    pub power_watts: i16,
    pub cadence_rpm: f64,
    pub heart_rate_bpm: Option<u16>,
    pub speed_kmh: f64,
}

/// Everything a display needs at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveSnapshot {
    pub power_watts: i16,
    pub cadence_rpm: f64,
    pub speed_kmh: f64,
    pub heart_rate_bpm: Option<u16>,
    pub avg_power: f64,
    pub avg_cadence: f64,
    pub avg_heart_rate: f64,
    pub max_power: i16,
    pub max_cadence: f64,
    pub max_heart_rate: Option<u16>,
}

/// Rolling aggregation of trainer and heart rate telemetry for one ride.
#[derive(Debug, Clone)]
pub struct LiveMetrics {
    config: LiveMetricsConfig,
    power: RollingBuffer,
    cadence: RollingBuffer,
    heart_rate: RollingBuffer,
    current: SampleReading,
    max_power: i16,
    max_cadence: f64,
    max_heart_rate: Option<u16>,
}

impl Default for LiveMetrics {
    fn default() -> Self {
        Self::new(LiveMetricsConfig::default())
    }
}

impl LiveMetrics {
    pub fn new(config: LiveMetricsConfig) -> Self {
        Self {
            config,
            power: RollingBuffer::new(config.buffer_capacity),
            cadence: RollingBuffer::new(config.buffer_capacity),
            heart_rate: RollingBuffer::new(config.buffer_capacity),
            current: SampleReading::default(),
            max_power: 0,
            max_cadence: 0.0,
            max_heart_rate: None,
        }
    }

    pub fn push_trainer(&mut self, frame: &TrainerFrame) {
        self.current.power_watts = frame.power_watts;
        self.current.cadence_rpm = frame.cadence_rpm;
        self.current.speed_kmh = frame.speed_kmh;

        self.power.push(f64::from(frame.power_watts));
        self.cadence.push(frame.cadence_rpm);

        self.max_power = self.max_power.max(frame.power_watts);
        self.max_cadence = self.max_cadence.max(frame.cadence_rpm);

        // Relayed heart rate is shown but does not feed the HR buffer.
        if let Some(hr) = frame.heart_rate_bpm {
            self.update_heart_rate(u16::from(hr));
        }
    }

    pub fn push_heart_rate(&mut self, frame: &HeartRateFrame) {
        self.heart_rate.push(f64::from(frame.heart_rate_bpm));
        self.update_heart_rate(frame.heart_rate_bpm);
    }

    fn update_heart_rate(&mut self, bpm: u16) {
        self.current.heart_rate_bpm = Some(bpm);
        self.max_heart_rate = Some(self.max_heart_rate.map_or(bpm, |m| m.max(bpm)));
    }

    /// Current instantaneous values.
    pub fn reading(&self) -> SampleReading {
        self.current
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            power_watts: self.current.power_watts,
            cadence_rpm: self.current.cadence_rpm,
            speed_kmh: self.current.speed_kmh,
            heart_rate_bpm: self.current.heart_rate_bpm,
            avg_power: self.power.recent_average(self.config.trainer_window),
            avg_cadence: self.cadence.recent_average(self.config.trainer_window),
            avg_heart_rate: self.heart_rate.recent_average(self.config.heart_rate_window),
            max_power: self.max_power,
            max_cadence: self.max_cadence,
            max_heart_rate: self.max_heart_rate,
        }
    }

    pub fn power_buffer(&self) -> &RollingBuffer {
        &self.power
    }

    pub fn cadence_buffer(&self) -> &RollingBuffer {
        &self.cadence
    }

    pub fn heart_rate_buffer(&self) -> &RollingBuffer {
        &self.heart_rate
    }

    /// Clear buffers, current values and maxima for a new ride.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}
