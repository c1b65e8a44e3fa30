//! Unit tests for the session engine state machine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ridecontrol::metrics::live::SampleReading;
use ridecontrol::recording::WorkoutRecord;
use ridecontrol::storage::{MemoryStore, StorageError, WorkoutStore};
use ridecontrol::workouts::{
    EngineConfig, ManualClock, PowerTarget, SessionEngine, SessionStatus, TickOutcome,
    WorkoutError, WorkoutInterval, WorkoutTemplate,
};

const SECOND: Duration = Duration::from_secs(1);

fn reading(power: i16) -> SampleReading {
    SampleReading {
        power_watts: power,
        cadence_rpm: 88.0,
        heart_rate_bpm: Some(135),
        speed_kmh: 32.0,
    }
}

fn engine_with_clock() -> (SessionEngine, ManualClock) {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 9, 17, 45, 0).unwrap());
    let config = EngineConfig {
        ftp: Some(200),
        ..Default::default()
    };
    (SessionEngine::with_clock(config, Arc::new(clock.clone())), clock)
}

/// Advance one second, tick and record, the way the controller does.
fn ride_second(engine: &mut SessionEngine, clock: &ManualClock, power: i16) -> TickOutcome {
    clock.advance(SECOND);
    let outcome = engine.tick();
    engine.add_sample(reading(power));
    outcome
}

struct FailingStore;

impl WorkoutStore for FailingStore {
    fn save_record(&self, _: &WorkoutRecord) -> Result<i64, StorageError> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }
    fn recent_records(&self, _: usize) -> Result<Vec<WorkoutRecord>, StorageError> {
        Ok(Vec::new())
    }
    fn get_record(&self, _: i64) -> Result<Option<WorkoutRecord>, StorageError> {
        Ok(None)
    }
    fn delete_record(&self, id: i64) -> Result<(), StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }
    fn save_template(&self, _: &WorkoutTemplate) -> Result<i64, StorageError> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }
    fn list_templates(&self) -> Result<Vec<WorkoutTemplate>, StorageError> {
        Ok(Vec::new())
    }
    fn get_template(&self, _: i64) -> Result<Option<WorkoutTemplate>, StorageError> {
        Ok(None)
    }
    fn update_template(&self, _: &WorkoutTemplate) -> Result<(), StorageError> {
        Err(StorageError::QueryFailed("disk full".to_string()))
    }
    fn delete_template(&self, id: i64) -> Result<(), StorageError> {
        Err(StorageError::NotFound(id.to_string()))
    }
}

#[test]
fn test_transitions() {
    let (mut engine, _) = engine_with_clock();
    assert_eq!(engine.status(), SessionStatus::Idle);
    assert!(matches!(
        engine.pause(),
        Err(WorkoutError::InvalidTransition { action: "pause", .. })
    ));
    assert!(engine.resume().is_err());
    assert!(engine.stop().is_none());

    engine.start_free_ride().unwrap();
    assert_eq!(engine.status(), SessionStatus::Running);
    assert!(engine.start_free_ride().is_err());

    engine.pause().unwrap();
    assert_eq!(engine.status(), SessionStatus::Paused);
    assert!(!engine.is_recording());
    engine.resume().unwrap();
    assert!(engine.is_recording());

    let record = engine.stop().unwrap();
    assert_eq!(engine.status(), SessionStatus::Completed);
    assert!(engine.start_free_ride().is_err());

    // Stopping again hands back the same record
    assert_eq!(engine.stop().unwrap(), record);

    engine.reset();
    assert_eq!(engine.status(), SessionStatus::Idle);
    assert!(engine.start_free_ride().is_ok());
}

#[test]
fn test_single_second_workout_completes_on_first_tick() {
    let (mut engine, clock) = engine_with_clock();
    let template = WorkoutTemplate::new(
        "Blip",
        vec![WorkoutInterval::new("0", "Only", 1, PowerTarget::absolute(180))],
    )
    .unwrap();
    engine.start_workout(template).unwrap();
    assert_eq!(engine.target_power(), Some(180));

    clock.advance(SECOND);
    match engine.tick() {
        TickOutcome::Completed(record) => {
            assert_eq!(record.name, "Blip");
            assert_eq!(record.summary.duration_seconds, 1);
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(engine.status(), SessionStatus::Completed);
    assert_eq!(engine.tick(), TickOutcome::Ignored);
}

#[test]
fn test_single_second_workout_keeps_sample_taken_before_completion() {
    let (mut engine, clock) = engine_with_clock();
    let template = WorkoutTemplate::new(
        "Blip",
        vec![WorkoutInterval::new("0", "Only", 1, PowerTarget::absolute(100))],
    )
    .unwrap();
    engine.start_workout(template).unwrap();

    clock.advance(SECOND);
    assert!(engine.add_sample(reading(110)));
    match engine.tick() {
        TickOutcome::Completed(record) => {
            assert_eq!(record.samples.len(), 1);
            assert_eq!(record.samples[0].power_watts, 110);
            assert_eq!(record.samples[0].target_power, Some(100));
            assert_eq!(record.summary.duration_seconds, 1);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    clock.advance(SECOND);
    assert_eq!(engine.tick(), TickOutcome::Ignored);
    assert!(!engine.add_sample(reading(120)));
    assert_eq!(engine.stop().unwrap().samples.len(), 1);
}

#[test]
fn test_interval_targets_and_sample_stamping() {
    let (mut engine, clock) = engine_with_clock();
    let template = WorkoutTemplate::new(
        "Steps",
        vec![
            WorkoutInterval::new("0", "Easy", 2, PowerTarget::percent_ftp(60)),
            WorkoutInterval::new("1", "Spin", 1, PowerTarget::absolute(0)),
            WorkoutInterval::new("2", "Hard", 2, PowerTarget::absolute(300)),
        ],
    )
    .unwrap();
    engine.start_workout(template).unwrap();
    assert_eq!(engine.target_power(), Some(120));

    assert_eq!(ride_second(&mut engine, &clock, 120), TickOutcome::Ticked);
    assert_eq!(
        ride_second(&mut engine, &clock, 125),
        TickOutcome::IntervalAdvanced {
            index: 1,
            target_power: None
        }
    );
    assert_eq!(
        ride_second(&mut engine, &clock, 90),
        TickOutcome::IntervalAdvanced {
            index: 2,
            target_power: Some(300)
        }
    );
    assert_eq!(ride_second(&mut engine, &clock, 290), TickOutcome::Ticked);
    clock.advance(SECOND);
    let record = match engine.tick() {
        TickOutcome::Completed(record) => *record,
        other => panic!("expected completion, got {:?}", other),
    };

    let targets: Vec<Option<u16>> = record.samples.iter().map(|s| s.target_power).collect();
    assert_eq!(targets, vec![Some(120), None, Some(300), Some(300)]);
    let elapsed: Vec<u32> = record.samples.iter().map(|s| s.elapsed_seconds).collect();
    assert_eq!(elapsed, vec![1, 2, 3, 4]);
    assert_eq!(record.summary.duration_seconds, 5);
}

#[test]
fn test_percent_target_without_ftp_has_no_target() {
    let clock = ManualClock::new(Utc::now());
    let mut engine = SessionEngine::with_clock(EngineConfig::default(), Arc::new(clock));
    let template = WorkoutTemplate::new(
        "Percent",
        vec![WorkoutInterval::new("0", "Tempo", 60, PowerTarget::percent_ftp(80))],
    )
    .unwrap();
    engine.start_workout(template).unwrap();
    assert_eq!(engine.target_power(), None);
}

#[test]
fn test_debounce_rejects_close_samples() {
    let (mut engine, clock) = engine_with_clock();
    engine.start_free_ride().unwrap();

    // Too soon after the start
    clock.advance(Duration::from_millis(500));
    assert!(!engine.add_sample(reading(200)));

    clock.advance(Duration::from_millis(400));
    assert!(engine.add_sample(reading(200)));

    clock.advance(Duration::from_millis(899));
    assert!(!engine.add_sample(reading(210)));
    clock.advance(Duration::from_millis(1));
    assert!(engine.add_sample(reading(210)));
    assert_eq!(engine.samples().len(), 2);
}

#[test]
fn test_pause_stops_accrual() {
    let (mut engine, clock) = engine_with_clock();
    engine.start_free_ride().unwrap();
    ride_second(&mut engine, &clock, 200);
    ride_second(&mut engine, &clock, 200);
    engine.pause().unwrap();

    for _ in 0..5 {
        assert_eq!(ride_second(&mut engine, &clock, 200), TickOutcome::Ignored);
    }
    assert_eq!(engine.elapsed_seconds(), 2);
    assert_eq!(engine.samples().len(), 2);

    engine.resume().unwrap();
    clock.advance(SECOND);
    assert_eq!(engine.tick(), TickOutcome::Ticked);
    assert_eq!(engine.elapsed_seconds(), 3);
}

#[test]
fn test_free_ride_record_name_and_persistence() {
    let store = Arc::new(MemoryStore::new());
    let (engine, clock) = engine_with_clock();
    let mut engine = engine.with_store(store.clone());

    engine.start_free_ride().unwrap();
    for _ in 0..3 {
        ride_second(&mut engine, &clock, 150);
    }
    let record = engine.stop().unwrap();

    assert_eq!(record.name, "Free Ride - 2024-03-09");
    assert_eq!(record.template_id, None);
    assert!(record.samples.iter().all(|s| s.target_power.is_none()));
    let id = record.id.unwrap();
    assert_eq!(store.get_record(id).unwrap().unwrap().samples.len(), 3);
}

#[test]
fn test_store_failure_still_returns_record() {
    let (engine, clock) = engine_with_clock();
    let mut engine = engine.with_store(Arc::new(FailingStore));

    engine.start_free_ride().unwrap();
    ride_second(&mut engine, &clock, 175);
    let record = engine.stop().unwrap();

    assert_eq!(record.id, None);
    assert_eq!(record.samples.len(), 1);
    assert_eq!(engine.status(), SessionStatus::Completed);
}

#[test]
fn test_progress_reports_interval() {
    let (mut engine, clock) = engine_with_clock();
    let template = WorkoutTemplate::new(
        "Progress",
        vec![WorkoutInterval::new("0", "Block", 10, PowerTarget::absolute(200))],
    )
    .unwrap();
    engine.start_workout(template).unwrap();
    ride_second(&mut engine, &clock, 200);
    ride_second(&mut engine, &clock, 200);

    let progress = engine.progress();
    assert_eq!(progress.elapsed_seconds, 2);
    assert_eq!(progress.interval_index, Some(0));
    assert_eq!(progress.interval_name.as_deref(), Some("Block"));
    assert_eq!(progress.interval_remaining, Some(8));
    assert_eq!(progress.sample_count, 2);
}
