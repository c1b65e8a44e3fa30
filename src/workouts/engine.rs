//! Session engine.
//!
//! State machine over Idle, Running, Paused and Completed. `tick` is called
//! once per elapsed second while running and drives interval progression;
//! `add_sample` appends to the timeline at most once per sample spacing.
//! Exhausting the last interval of a template stops the session from inside
//! `tick`.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::analytics::summarize;
use crate::metrics::live::SampleReading;
use crate::recording::types::{WorkoutRecord, WorkoutSample};
use crate::storage::WorkoutStore;
use crate::workouts::clock::{Clock, SystemClock};
use crate::workouts::types::{SessionStatus, WorkoutError, WorkoutInterval, WorkoutTemplate};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rider FTP, used to resolve percentage targets and for IF/TSS
    pub ftp: Option<u16>,
    /// Minimum wall-clock gap between accepted samples
    pub min_sample_spacing: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ftp: None,
            min_sample_spacing: Duration::from_millis(900),
        }
    }
}

/// What a call to [`SessionEngine::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Not running; nothing changed
    Ignored,
    /// One second accrued
    Ticked,
    /// Moved to the interval at `index`
    IntervalAdvanced {
        index: usize,
        target_power: Option<u16>,
    },
    /// The last interval ran out and the session stopped
    Completed(Box<WorkoutRecord>),
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionProgress {
    pub status: SessionStatus,
    pub elapsed_seconds: u32,
    pub interval_index: Option<usize>,
    pub interval_name: Option<String>,
    pub interval_remaining: Option<u32>,
    pub target_power: Option<u16>,
    pub sample_count: usize,
}

/// Drives a free ride or a structured workout.
pub struct SessionEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn WorkoutStore>>,
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    elapsed_seconds: u32,
    template: Option<WorkoutTemplate>,
    interval_index: usize,
    interval_elapsed: u32,
    target_power: Option<u16>,
    recording: bool,
    last_sample_at: Option<DateTime<Utc>>,
    samples: Vec<WorkoutSample>,
    completed: Option<WorkoutRecord>,
}

impl SessionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            store: None,
            status: SessionStatus::Idle,
            started_at: None,
            elapsed_seconds: 0,
            template: None,
            interval_index: 0,
            interval_elapsed: 0,
            target_power: None,
            recording: false,
            last_sample_at: None,
            samples: Vec::new(),
            completed: None,
        }
    }

    /// Persist finished records through `store`.
    pub fn with_store(mut self, store: Arc<dyn WorkoutStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_ftp(&mut self, ftp: Option<u16>) {
        self.config.ftp = ftp;
    }

    fn require(&self, expected: SessionStatus, action: &'static str) -> Result<(), WorkoutError> {
        if self.status != expected {
            return Err(WorkoutError::InvalidTransition {
                action,
                status: self.status,
            });
        }
        Ok(())
    }

    fn begin(&mut self, template: Option<WorkoutTemplate>) {
        let now = self.clock.now();
        self.target_power = template
            .as_ref()
            .and_then(|t| t.intervals.first())
            .and_then(|i| self.resolve_target(i));
        self.template = template;
        self.status = SessionStatus::Running;
        self.started_at = Some(now);
        self.elapsed_seconds = 0;
        self.interval_index = 0;
        self.interval_elapsed = 0;
        self.recording = true;
        self.last_sample_at = Some(now);
        self.samples.clear();
        self.completed = None;
    }

    /// Start an unstructured ride with no target.
    pub fn start_free_ride(&mut self) -> Result<(), WorkoutError> {
        self.require(SessionStatus::Idle, "start")?;
        self.begin(None);
        tracing::info!("Free ride started");
        Ok(())
    }

    /// Start a structured workout at its first interval.
    pub fn start_workout(&mut self, template: WorkoutTemplate) -> Result<(), WorkoutError> {
        self.require(SessionStatus::Idle, "start")?;
        tracing::info!(
            "Workout '{}' started ({} intervals, {}s)",
            template.name,
            template.intervals.len(),
            template.total_duration_seconds()
        );
        self.begin(Some(template));
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), WorkoutError> {
        self.require(SessionStatus::Running, "pause")?;
        self.status = SessionStatus::Paused;
        self.recording = false;
        tracing::info!("Session paused at {}s", self.elapsed_seconds);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), WorkoutError> {
        self.require(SessionStatus::Paused, "resume")?;
        self.status = SessionStatus::Running;
        self.recording = true;
        self.last_sample_at = Some(self.clock.now());
        tracing::info!("Session resumed");
        Ok(())
    }

    /// Advance by one second. Only acts while running.
    pub fn tick(&mut self) -> TickOutcome {
        if self.status != SessionStatus::Running {
            return TickOutcome::Ignored;
        }

        self.elapsed_seconds += 1;
        self.interval_elapsed += 1;

        let Some(template) = &self.template else {
            return TickOutcome::Ticked;
        };
        let Some(current) = template.intervals.get(self.interval_index) else {
            return TickOutcome::Ticked;
        };
        if self.interval_elapsed < current.duration_seconds {
            return TickOutcome::Ticked;
        }

        let next_index = self.interval_index + 1;
        match template.intervals.get(next_index).cloned() {
            Some(next) => {
                self.interval_index = next_index;
                self.interval_elapsed = 0;
                self.target_power = self.resolve_target(&next);
                tracing::info!(
                    "Interval {} '{}' ({}s, target {:?}W)",
                    next_index + 1,
                    next.name,
                    next.duration_seconds,
                    self.target_power
                );
                TickOutcome::IntervalAdvanced {
                    index: next_index,
                    target_power: self.target_power,
                }
            }
            None => {
                tracing::info!("Final interval finished, stopping session");
                match self.stop() {
                    Some(record) => TickOutcome::Completed(Box::new(record)),
                    None => TickOutcome::Ticked,
                }
            }
        }
    }

    /// Append a timeline entry stamped with the current target.
    ///
    /// Rejected while not recording or when less than the minimum spacing
    /// has passed since the previous accepted sample.
    pub fn add_sample(&mut self, reading: SampleReading) -> bool {
        if !self.recording {
            return false;
        }

        let now = self.clock.now();
        if let Some(last) = self.last_sample_at {
            let spacing = chrono::Duration::from_std(self.config.min_sample_spacing)
                .unwrap_or_else(|_| chrono::Duration::zero());
            if now - last < spacing {
                return false;
            }
        }

        self.samples.push(WorkoutSample {
            timestamp: now,
            elapsed_seconds: self.elapsed_seconds,
            power_watts: reading.power_watts,
            cadence_rpm: reading.cadence_rpm,
            heart_rate_bpm: reading.heart_rate_bpm,
            speed_kmh: reading.speed_kmh,
            target_power: self.target_power,
        });
        self.last_sample_at = Some(now);
        true
    }

    /// Finish the session and return its record.
    ///
    /// `None` when nothing was started. Calling again after completion
    /// returns the same record. A persistence failure is logged and the
    /// record is still returned.
    pub fn stop(&mut self) -> Option<WorkoutRecord> {
        match self.status {
            SessionStatus::Idle => return None,
            SessionStatus::Completed => return self.completed.clone(),
            SessionStatus::Running | SessionStatus::Paused => {}
        }

        let ended_at = self.clock.now();
        let started_at = self.started_at.unwrap_or(ended_at);
        let name = match &self.template {
            Some(t) => t.name.clone(),
            None => free_ride_name(started_at),
        };

        let mut record = WorkoutRecord {
            id: None,
            template_id: self.template.as_ref().and_then(|t| t.id),
            name,
            started_at,
            ended_at,
            summary: summarize(&self.samples, self.elapsed_seconds, self.config.ftp),
            samples: std::mem::take(&mut self.samples),
        };

        if let Some(store) = &self.store {
            match store.save_record(&record) {
                Ok(id) => record.id = Some(id),
                Err(e) => tracing::error!("Failed to save workout: {}", e),
            }
        }

        self.status = SessionStatus::Completed;
        self.recording = false;
        tracing::info!(
            "Session completed: {} ({}s, {} samples)",
            record.name,
            record.summary.duration_seconds,
            record.samples.len()
        );

        self.completed = Some(record.clone());
        Some(record)
    }

    /// Discard everything and return to idle.
    pub fn reset(&mut self) {
        let store = self.store.take();
        *self = Self::with_clock(self.config.clone(), self.clock.clone());
        self.store = store;
    }

    fn resolve_target(&self, interval: &WorkoutInterval) -> Option<u16> {
        if interval.target.is_free_ride() {
            return None;
        }
        let watts = interval.target.to_watts(self.config.ftp);
        if watts.is_none() {
            tracing::warn!(
                "Interval '{}' targets {} but no FTP is configured",
                interval.name,
                interval.target
            );
        }
        watts
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn elapsed_seconds(&self) -> u32 {
        self.elapsed_seconds
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn target_power(&self) -> Option<u16> {
        self.target_power
    }

    pub fn template(&self) -> Option<&WorkoutTemplate> {
        self.template.as_ref()
    }

    pub fn current_interval(&self) -> Option<&WorkoutInterval> {
        self.template
            .as_ref()
            .and_then(|t| t.intervals.get(self.interval_index))
    }

    pub fn interval_index(&self) -> usize {
        self.interval_index
    }

    pub fn interval_elapsed(&self) -> u32 {
        self.interval_elapsed
    }

    pub fn samples(&self) -> &[WorkoutSample] {
        &self.samples
    }

    pub fn progress(&self) -> SessionProgress {
        let interval = match self.status {
            SessionStatus::Running | SessionStatus::Paused => self.current_interval(),
            _ => None,
        };
        SessionProgress {
            status: self.status,
            elapsed_seconds: self.elapsed_seconds,
            interval_index: interval.map(|_| self.interval_index),
            interval_name: interval.map(|i| i.name.clone()),
            interval_remaining: interval
                .map(|i| i.duration_seconds.saturating_sub(self.interval_elapsed)),
            target_power: self.target_power,
            sample_count: self.samples.len(),
        }
    }
}

/// "Free Ride - YYYY-MM-DD" of the start date.
pub fn free_ride_name(started_at: DateTime<Utc>) -> String {
    format!("Free Ride - {}", started_at.format("%Y-%m-%d"))
}
