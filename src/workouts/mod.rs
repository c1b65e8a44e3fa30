//! Structured workouts and the session engine.

pub mod clock;
pub mod engine;
pub mod parser_zwo;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{free_ride_name, EngineConfig, SessionEngine, SessionProgress, TickOutcome};
pub use parser_zwo::{export_zwo, parse_zwo, parse_zwo_file};
pub use types::{
    CadenceTarget, PowerTarget, SessionStatus, WorkoutError, WorkoutInterval, WorkoutParseError,
    WorkoutTemplate,
};
