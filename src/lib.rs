//! RideControl - smart trainer control and workout recording
//!
//! Talks to FTMS smart trainers and heart rate straps over Bluetooth LE,
//! drives the trainer in ERG mode through structured workouts, and records
//! rides to SQLite with TCX export.

pub mod controller;
pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod storage;
pub mod workouts;

// Re-export commonly used types
pub use controller::{RideCommand, RideController, RideUpdate};
pub use metrics::live::LiveMetrics;
pub use sensors::{HeartRateSession, TrainerSession};
pub use storage::{AppConfig, Database, WorkoutStore};
pub use workouts::engine::SessionEngine;
