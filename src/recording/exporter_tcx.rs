//! TCX export for finished workouts.
//!
//! One Activity with a single Lap. Trackpoint distance is recomputed per point
//! from that sample's speed and wall-clock offset, independently of the lap
//! distance.

use crate::recording::types::{ExportError, WorkoutRecord, WorkoutSample};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// TCX XML namespaces
const NS_TCX: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";
const NS_TPX: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

const CREATOR_NAME: &str = "ridecontrol";

fn iso_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Estimated kilocalories: average watts times seconds, in kJ.
pub fn estimate_calories(avg_power: f64, duration_seconds: u32) -> i64 {
    (avg_power * f64::from(duration_seconds) / 1000.0).round() as i64
}

/// Export a workout to TCX.
pub fn export_tcx(record: &WorkoutRecord) -> Result<String, ExportError> {
    if record.samples.is_empty() {
        return Err(ExportError::NoData);
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    let mut root = BytesStart::new("TrainingCenterDatabase");
    root.push_attribute(("xmlns", NS_TCX));
    root.push_attribute(("xmlns:ns3", NS_TPX));
    root.push_attribute(("xmlns:xsi", NS_XSI));
    root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    open(&mut writer, BytesStart::new("Activities"))?;

    let mut activity = BytesStart::new("Activity");
    activity.push_attribute(("Sport", "Biking"));
    open(&mut writer, activity)?;

    write_element(&mut writer, "Id", &iso_time(record.started_at))?;
    write_lap(&mut writer, record)?;
    write_creator(&mut writer)?;

    close(&mut writer, "Activity")?;
    close(&mut writer, "Activities")?;
    close(&mut writer, "TrainingCenterDatabase")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| ExportError::XmlError(e.to_string()))
}

fn write_lap<W: std::io::Write>(
    writer: &mut Writer<W>,
    record: &WorkoutRecord,
) -> Result<(), ExportError> {
    let summary = &record.summary;

    let mut lap = BytesStart::new("Lap");
    lap.push_attribute(("StartTime", iso_time(record.started_at).as_str()));
    open(writer, lap)?;

    write_element(
        writer,
        "TotalTimeSeconds",
        &summary.duration_seconds.to_string(),
    )?;
    write_element(
        writer,
        "DistanceMeters",
        &format!("{:.1}", summary.distance_km * 1000.0),
    )?;
    write_element(
        writer,
        "Calories",
        &estimate_calories(summary.avg_power, summary.duration_seconds).to_string(),
    )?;

    if let Some(avg_hr) = summary.avg_heart_rate {
        write_heart_rate_element(writer, "AverageHeartRateBpm", avg_hr.round() as u16)?;
    }
    if let Some(max_hr) = summary.max_heart_rate {
        write_heart_rate_element(writer, "MaximumHeartRateBpm", max_hr)?;
    }

    write_element(writer, "Intensity", "Active")?;
    write_element(
        writer,
        "Cadence",
        &(summary.avg_cadence.round() as i64).to_string(),
    )?;
    write_element(writer, "TriggerMethod", "Manual")?;

    open(writer, BytesStart::new("Track"))?;
    for sample in &record.samples {
        write_trackpoint(writer, record.started_at, sample)?;
    }
    close(writer, "Track")?;

    open(writer, BytesStart::new("Extensions"))?;
    open(writer, BytesStart::new("ns3:LX"))?;
    write_element(
        writer,
        "ns3:AvgWatts",
        &(summary.avg_power.round() as i64).to_string(),
    )?;
    write_element(writer, "ns3:MaxWatts", &summary.max_power.to_string())?;
    close(writer, "ns3:LX")?;
    close(writer, "Extensions")?;

    close(writer, "Lap")
}

/// Cumulative distance in meters at a trackpoint.
pub fn trackpoint_distance_meters(started_at: DateTime<Utc>, sample: &WorkoutSample) -> f64 {
    let elapsed_ms = (sample.timestamp - started_at).num_milliseconds() as f64;
    sample.speed_kmh * (elapsed_ms / 3_600_000.0) * 1000.0
}

fn write_trackpoint<W: std::io::Write>(
    writer: &mut Writer<W>,
    started_at: DateTime<Utc>,
    sample: &WorkoutSample,
) -> Result<(), ExportError> {
    open(writer, BytesStart::new("Trackpoint"))?;

    write_element(writer, "Time", &iso_time(sample.timestamp))?;
    write_element(
        writer,
        "DistanceMeters",
        &format!("{:.1}", trackpoint_distance_meters(started_at, sample)),
    )?;

    if let Some(hr) = sample.heart_rate_bpm {
        write_heart_rate_element(writer, "HeartRateBpm", hr)?;
    }

    write_element(
        writer,
        "Cadence",
        &(sample.cadence_rpm.round() as i64).to_string(),
    )?;

    open(writer, BytesStart::new("Extensions"))?;
    open(writer, BytesStart::new("ns3:TPX"))?;
    write_element(writer, "ns3:Watts", &sample.power_watts.to_string())?;
    close(writer, "ns3:TPX")?;
    close(writer, "Extensions")?;

    close(writer, "Trackpoint")
}

fn write_creator<W: std::io::Write>(writer: &mut Writer<W>) -> Result<(), ExportError> {
    let mut creator = BytesStart::new("Creator");
    creator.push_attribute(("xsi:type", "Device_t"));
    open(writer, creator)?;
    write_element(writer, "Name", CREATOR_NAME)?;
    write_element(writer, "UnitId", "0")?;
    write_element(writer, "ProductID", "0")?;
    close(writer, "Creator")
}

fn open<W: std::io::Write>(writer: &mut Writer<W>, start: BytesStart) -> Result<(), ExportError> {
    writer
        .write_event(Event::Start(start))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    Ok(())
}

fn close<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), ExportError> {
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    Ok(())
}

/// Write a simple element with text content.
fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), ExportError> {
    open(writer, BytesStart::new(name))?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    close(writer, name)
}

/// Write a heart rate element with Value sub-element.
fn write_heart_rate_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: u16,
) -> Result<(), ExportError> {
    open(writer, BytesStart::new(name))?;
    write_element(writer, "Value", &value.to_string())?;
    close(writer, name)
}

/// Export a workout to TCX and write to a file.
pub fn export_tcx_to_file(record: &WorkoutRecord, path: &std::path::Path) -> Result<(), ExportError> {
    let content = export_tcx(record)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default file name: the workout name with non-alphanumerics replaced, plus
/// the start date.
pub fn generate_tcx_filename(record: &WorkoutRecord) -> String {
    let name: String = record
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_{}.tcx", name, record.started_at.format("%Y-%m-%d"))
}
