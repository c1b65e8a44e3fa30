//! Unit tests for workout and template storage.

use chrono::{Duration, TimeZone, Utc};
use ridecontrol::recording::{WorkoutRecord, WorkoutSample, WorkoutSummary};
use ridecontrol::storage::{Database, MemoryStore, StorageError, WorkoutStore};
use ridecontrol::workouts::{PowerTarget, WorkoutInterval, WorkoutTemplate};

fn record(name: &str, day: u32) -> WorkoutRecord {
    let start = Utc.with_ymd_and_hms(2024, 6, day, 18, 0, 0).unwrap();
    WorkoutRecord {
        id: None,
        template_id: None,
        name: name.to_string(),
        started_at: start,
        ended_at: start + Duration::seconds(2),
        samples: vec![
            WorkoutSample {
                timestamp: start + Duration::seconds(1),
                elapsed_seconds: 1,
                power_watts: 210,
                cadence_rpm: 91.5,
                heart_rate_bpm: Some(150),
                speed_kmh: 33.2,
                target_power: Some(200),
            },
            WorkoutSample {
                timestamp: start + Duration::seconds(2),
                elapsed_seconds: 2,
                power_watts: -3,
                cadence_rpm: 0.0,
                heart_rate_bpm: None,
                speed_kmh: 0.0,
                target_power: None,
            },
        ],
        summary: WorkoutSummary {
            duration_seconds: 2,
            avg_power: 103.5,
            max_power: 210,
            normalized_power: Some(103.5),
            tss: Some(1.2),
            ..Default::default()
        },
    }
}

fn template(name: &str) -> WorkoutTemplate {
    WorkoutTemplate::new(
        name,
        vec![
            WorkoutInterval::new("0", "Warm", 300, PowerTarget::percent_ftp(55)),
            WorkoutInterval::new("1", "Work", 600, PowerTarget::absolute(240)).with_cadence(85, 95),
        ],
    )
    .unwrap()
    .with_description("Test template")
}

fn exercise_records(store: &dyn WorkoutStore) {
    let first = store.save_record(&record("Tuesday", 4)).unwrap();
    let second = store.save_record(&record("Thursday", 6)).unwrap();
    let third = store.save_record(&record("Monday", 3)).unwrap();
    assert_ne!(first, second);

    let recent = store.recent_records(2).unwrap();
    let names: Vec<&str> = recent.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Thursday", "Tuesday"]);

    let loaded = store.get_record(first).unwrap().unwrap();
    let mut expected = record("Tuesday", 4);
    expected.id = Some(first);
    assert_eq!(loaded, expected);

    store.delete_record(third).unwrap();
    assert!(store.get_record(third).unwrap().is_none());
    assert!(matches!(
        store.delete_record(third),
        Err(StorageError::NotFound(_))
    ));
    assert_eq!(store.recent_records(10).unwrap().len(), 2);
}

fn exercise_templates(store: &dyn WorkoutStore) {
    let b = store.save_template(&template("B Threshold")).unwrap();
    let a = store.save_template(&template("A Endurance")).unwrap();

    let names: Vec<String> = store
        .list_templates()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["A Endurance", "B Threshold"]);

    let mut loaded = store.get_template(b).unwrap().unwrap();
    assert_eq!(loaded.id, Some(b));
    assert_eq!(loaded.intervals, template("B Threshold").intervals);
    assert_eq!(loaded.description.as_deref(), Some("Test template"));

    let before = loaded.updated_at;
    loaded.name = "C Threshold".to_string();
    loaded.intervals.pop();
    store.update_template(&loaded).unwrap();
    let updated = store.get_template(b).unwrap().unwrap();
    assert_eq!(updated.name, "C Threshold");
    assert_eq!(updated.intervals.len(), 1);
    assert!(updated.updated_at >= before);

    store.delete_template(a).unwrap();
    assert!(matches!(
        store.delete_template(a),
        Err(StorageError::NotFound(_))
    ));

    let mut orphan = template("Orphan");
    orphan.id = Some(999);
    assert!(matches!(
        store.update_template(&orphan),
        Err(StorageError::NotFound(_))
    ));
    assert!(store.update_template(&template("No id")).is_err());
}

#[test]
fn test_database_records() {
    exercise_records(&Database::open_in_memory().unwrap());
}

#[test]
fn test_database_templates() {
    exercise_templates(&Database::open_in_memory().unwrap());
}

#[test]
fn test_memory_store_records() {
    exercise_records(&MemoryStore::new());
}

#[test]
fn test_memory_store_templates() {
    exercise_templates(&MemoryStore::new());
}

#[test]
fn test_database_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("rides.db");

    let id = {
        let db = Database::open(&path).unwrap();
        db.save_record(&record("Saved", 10)).unwrap()
    };

    let db = Database::open(&path).unwrap();
    assert_eq!(db.schema_version().unwrap(), 1);
    let loaded = db.get_record(id).unwrap().unwrap();
    assert_eq!(loaded.name, "Saved");
    assert_eq!(loaded.samples.len(), 2);
    assert_eq!(loaded.samples[1].power_watts, -3);
}
