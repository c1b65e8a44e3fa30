//! Unit tests for TCX export.

use chrono::{Duration, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use ridecontrol::metrics::analytics::summarize;
use ridecontrol::recording::exporter_tcx::trackpoint_distance_meters;
use ridecontrol::recording::{
    export_tcx, export_tcx_to_file, generate_tcx_filename, ExportError, WorkoutRecord,
    WorkoutSample,
};

fn record(count: usize, with_hr: bool) -> WorkoutRecord {
    let start = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
    let samples: Vec<WorkoutSample> = (1..=count)
        .map(|i| WorkoutSample {
            timestamp: start + Duration::seconds(i as i64),
            elapsed_seconds: i as u32,
            power_watts: 200 + (i % 5) as i16 * 10,
            cadence_rpm: 90.0,
            heart_rate_bpm: with_hr.then_some(140 + (i % 10) as u16),
            speed_kmh: 36.0,
            target_power: Some(220),
        })
        .collect();
    let summary = summarize(&samples, count as u32, Some(250));
    WorkoutRecord {
        id: None,
        template_id: Some(3),
        name: "Over/Unders #2".to_string(),
        started_at: start,
        ended_at: start + Duration::seconds(count as i64),
        samples,
        summary,
    }
}

/// Collect the text of every element with the given name.
fn texts(xml: &str, element: &str) -> Vec<String> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut inside = false;
    let mut out = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Start(e) if e.name().as_ref() == element.as_bytes() => inside = true,
            Event::Text(t) if inside => out.push(t.unescape().unwrap().to_string()),
            Event::End(_) => inside = false,
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

#[test]
fn test_one_trackpoint_per_sample() {
    let xml = export_tcx(&record(20, true)).unwrap();
    assert_eq!(texts(&xml, "Time").len(), 20);
    assert_eq!(texts(&xml, "ns3:Watts").len(), 20);
    assert_eq!(texts(&xml, "Id"), vec!["2025-01-15T10:00:00.000Z"]);
    assert_eq!(texts(&xml, "Name"), vec!["ridecontrol"]);
}

#[test]
fn test_trackpoint_distance_from_speed_and_offset() {
    let rec = record(10, true);
    // 36 km/h is 10 m/s; the tenth sample is ten seconds in
    assert!((trackpoint_distance_meters(rec.started_at, &rec.samples[9]) - 100.0).abs() < 1e-9);

    let xml = export_tcx(&rec).unwrap();
    let distances = texts(&xml, "DistanceMeters");
    // Lap distance first, then each trackpoint
    assert_eq!(distances[0], "100.0");
    assert_eq!(distances[1], "10.0");
    assert_eq!(distances[10], "100.0");
}

#[test]
fn test_heart_rate_elements_only_when_recorded() {
    let xml = export_tcx(&record(5, false)).unwrap();
    assert!(!xml.contains("HeartRateBpm"));

    let xml = export_tcx(&record(5, true)).unwrap();
    assert!(xml.contains("<AverageHeartRateBpm>"));
    assert!(xml.contains("<MaximumHeartRateBpm>"));
    assert_eq!(texts(&xml, "Value").len(), 2 + 5);
}

#[test]
fn test_empty_record_is_rejected() {
    assert!(matches!(export_tcx(&record(0, true)), Err(ExportError::NoData)));
}

#[test]
fn test_file_export_and_name() {
    let rec = record(5, true);
    let name = generate_tcx_filename(&rec);
    assert_eq!(name, "Over_Unders__2_2025-01-15.tcx");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(&name);
    export_tcx_to_file(&rec, &path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("<Activity Sport=\"Biking\">"));

    let missing = dir.path().join("no_such_dir").join(&name);
    assert!(matches!(
        export_tcx_to_file(&rec, &missing),
        Err(ExportError::IoError(_))
    ));
}
