//! Unit tests for ZWO workout import and export.

use ridecontrol::recording::ExportError;
use ridecontrol::workouts::{
    export_zwo, parse_zwo, parse_zwo_file, CadenceTarget, PowerTarget, WorkoutInterval,
    WorkoutParseError, WorkoutTemplate,
};

const SWEET_SPOT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workout_file>
    <author>Coach</author>
    <name>Sweet Spot &amp; Spin</name>
    <description>Two blocks near threshold</description>
    <sportType>bike</sportType>
    <workout>
        <Warmup Duration="600" PowerLow="0.40" PowerHigh="0.70"/>
        <IntervalsT Repeat="2" OnDuration="60" OffDuration="30" OnPower="1.10" OffPower="0.50" Cadence="100" CadenceResting="85"/>
        <SteadyState Duration="300" Power="0.90" CadenceLow="80" CadenceHigh="95">
            <textevent timeoffset="10" message="Settle in"/>
            <SteadyState Duration="999" Power="2.0"/>
        </SteadyState>
        <Ramp Duration="120" PowerLow="0.5" PowerHigh="1.0"/>
        <FreeRide Duration="120"/>
        <Cooldown Duration="300" PowerLow="0.60" PowerHigh="0.40"/>
    </workout>
</workout_file>"#;

#[test]
fn test_parse_full_workout() {
    let template = parse_zwo(SWEET_SPOT).unwrap();

    assert_eq!(template.name, "Sweet Spot & Spin");
    assert_eq!(template.description.as_deref(), Some("Two blocks near threshold"));

    let names: Vec<&str> = template.intervals.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Warmup",
            "Interval 1 - ON",
            "Interval 1 - REST",
            "Interval 2 - ON",
            "Interval 2 - REST",
            "Steady State",
            "Free Ride",
            "Cooldown",
        ]
    );

    let warmup = &template.intervals[0];
    assert_eq!(warmup.id, "0");
    assert_eq!(warmup.duration_seconds, 600);
    assert_eq!(warmup.target, PowerTarget::percent_ftp(55));

    let on = &template.intervals[1];
    assert_eq!(on.id, "1-0-on");
    assert_eq!(on.target, PowerTarget::percent_ftp(110));
    assert_eq!(
        on.cadence,
        Some(CadenceTarget {
            min_rpm: 95,
            max_rpm: 105
        })
    );
    let rest = &template.intervals[4];
    assert_eq!(rest.id, "1-1-off");
    assert_eq!(rest.target, PowerTarget::percent_ftp(50));
    assert_eq!(rest.cadence.map(|c| c.min_rpm), Some(80));

    // Nested blocks are ignored; explicit cadence bounds are kept
    let steady = &template.intervals[5];
    assert_eq!(steady.duration_seconds, 300);
    assert_eq!(
        steady.cadence,
        Some(CadenceTarget {
            min_rpm: 80,
            max_rpm: 95
        })
    );

    assert!(template.intervals[6].target.is_free_ride());
    assert_eq!(template.intervals[7].target, PowerTarget::percent_ftp(50));

    // 600 + 2 * 90 + 300 + 120 + 300
    assert_eq!(template.total_duration_seconds(), 1500);
}

#[test]
fn test_defaults_for_missing_attributes() {
    let zwo = r#"<workout_file><workout>
        <SteadyState Duration="60"/>
        <IntervalsT OnDuration="30"/>
    </workout></workout_file>"#;
    let template = parse_zwo(zwo).unwrap();

    assert_eq!(template.name, "Imported Workout");
    assert_eq!(template.intervals[0].target, PowerTarget::percent_ftp(50));
    // Repeat defaults to one, no rest without OffDuration
    assert_eq!(template.intervals.len(), 2);
    assert_eq!(template.intervals[1].target, PowerTarget::percent_ftp(100));
}

#[test]
fn test_parse_errors() {
    assert!(matches!(
        parse_zwo("<workout_file><name>x</name></workout_file>"),
        Err(WorkoutParseError::MissingField(_))
    ));
    assert!(matches!(
        parse_zwo("<workout_file><workout></workout></workout_file>"),
        Err(WorkoutParseError::EmptyWorkout)
    ));
    assert!(matches!(
        parse_zwo("<workout_file><workout><Ramp Duration=\"60\"/></workout></workout_file>"),
        Err(WorkoutParseError::EmptyWorkout)
    ));
    assert!(matches!(
        parse_zwo(r#"<workout_file><workout><SteadyState Duration="ten"/></workout></workout_file>"#),
        Err(WorkoutParseError::InvalidValue { .. })
    ));
    assert!(matches!(
        parse_zwo("<workout_file><workout><SteadyState></workout_file>"),
        Err(WorkoutParseError::InvalidXml(_))
    ));
}

#[test]
fn test_parse_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweet_spot.zwo");
    std::fs::write(&path, SWEET_SPOT).unwrap();
    assert_eq!(parse_zwo_file(&path).unwrap().intervals.len(), 8);

    assert!(matches!(
        parse_zwo_file(&dir.path().join("missing.zwo")),
        Err(WorkoutParseError::IoError(_))
    ));
}

#[test]
fn test_export_resolves_absolute_targets() {
    let template = WorkoutTemplate::new(
        "Mixed",
        vec![
            WorkoutInterval::new("0", "Tempo", 600, PowerTarget::percent_ftp(80))
                .with_cadence(85, 95),
            WorkoutInterval::new("1", "Hard", 120, PowerTarget::absolute(300)),
            WorkoutInterval::new("2", "Spin", 300, PowerTarget::absolute(0)),
        ],
    )
    .unwrap();

    let xml = export_zwo(&template, Some(250)).unwrap();
    assert!(xml.contains("<sportType>bike</sportType>"));
    assert!(xml.contains(r#"<SteadyState Duration="600" Power="0.80" Cadence="90"/>"#));
    assert!(xml.contains(r#"<SteadyState Duration="120" Power="1.20"/>"#));
    assert!(xml.contains(r#"<FreeRide Duration="300"/>"#));

    let reparsed = parse_zwo(&xml).unwrap();
    assert_eq!(reparsed.name, "Mixed");
    assert_eq!(reparsed.intervals[1].target, PowerTarget::percent_ftp(120));
    assert!(reparsed.intervals[2].target.is_free_ride());

    assert!(matches!(
        export_zwo(&template, None),
        Err(ExportError::FtpRequired)
    ));
}

#[test]
fn test_oversized_durations_and_repeats_are_rejected() {
    let huge = r#"<workout_file><workout>
        <SteadyState Duration="3000000000"/>
        <SteadyState Duration="3000000000"/>
    </workout></workout_file>"#;
    assert!(matches!(
        parse_zwo(huge),
        Err(WorkoutParseError::InvalidValue { ref field, .. }) if field == "Duration"
    ));

    let repeats = r#"<workout_file><workout>
        <IntervalsT Repeat="100000000" OnDuration="30" OffDuration="30"/>
    </workout></workout_file>"#;
    assert!(matches!(
        parse_zwo(repeats),
        Err(WorkoutParseError::InvalidValue { ref field, .. }) if field == "Repeat"
    ));

    let long_rest = r#"<workout_file><workout>
        <IntervalsT OnDuration="30" OffDuration="90000"/>
    </workout></workout_file>"#;
    assert!(matches!(
        parse_zwo(long_rest),
        Err(WorkoutParseError::InvalidValue { ref field, .. }) if field == "OffDuration"
    ));

    // Each block is allowed, the sum is not
    let blocks = r#"<SteadyState Duration="86400"/>"#.repeat(3);
    let total = format!("<workout_file><workout>{}</workout></workout_file>", blocks);
    assert!(matches!(
        parse_zwo(&total),
        Err(WorkoutParseError::InvalidValue { .. })
    ));

    let day = format!(
        "<workout_file><workout>{}</workout></workout_file>",
        r#"<SteadyState Duration="86400"/>"#.repeat(2)
    );
    assert_eq!(parse_zwo(&day).unwrap().total_duration_seconds(), 172_800);
}

#[test]
fn test_total_duration_saturates() {
    let template = WorkoutTemplate::new(
        "Endless",
        vec![
            WorkoutInterval::new("0", "A", u32::MAX - 10, PowerTarget::percent_ftp(50)),
            WorkoutInterval::new("1", "B", 3_000_000_000, PowerTarget::percent_ftp(50)),
        ],
    )
    .unwrap();
    assert_eq!(template.total_duration_seconds(), u32::MAX);
}
