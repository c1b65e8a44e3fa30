//! Recorded workouts and TCX export.

pub mod exporter_tcx;
pub mod types;

pub use exporter_tcx::{export_tcx, export_tcx_to_file, generate_tcx_filename};
pub use types::{ExportError, WorkoutRecord, WorkoutSample, WorkoutSummary};
