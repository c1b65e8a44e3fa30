//! Zwift workout (.zwo) import and export.
//!
//! Power in ZWO is a fraction of FTP; intervals store it as an integer
//! percentage. Only direct children of `<workout>` are blocks; anything
//! nested inside a block (text events) is ignored.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::str::FromStr;

use crate::recording::types::ExportError;
use crate::workouts::types::{
    CadenceTarget, PowerTarget, WorkoutInterval, WorkoutParseError, WorkoutTemplate,
};

/// Longest accepted block or ON/REST duration, in seconds.
pub const MAX_BLOCK_SECONDS: u32 = 24 * 3600;

/// Most repetitions accepted for an `IntervalsT` block.
pub const MAX_REPEAT: u32 = 500;

/// Longest accepted workout, in seconds.
pub const MAX_WORKOUT_SECONDS: u64 = 48 * 3600;

/// Parse a ZWO workout from XML content.
pub fn parse_zwo(content: &str) -> Result<WorkoutTemplate, WorkoutParseError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut workout_name: Option<String> = None;
    let mut workout_description: Option<String> = None;
    let mut intervals: Vec<WorkoutInterval> = Vec::new();

    let mut saw_workout = false;
    let mut in_workout = false;
    let mut depth = 0usize;
    let mut block_index = 0usize;
    let mut current_element: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if in_workout {
                    if depth == 0 {
                        intervals.extend(parse_block(&name, e, block_index)?);
                        block_index += 1;
                    }
                    depth += 1;
                } else {
                    match name.as_str() {
                        "name" | "description" => current_element = Some(name),
                        "workout" => {
                            saw_workout = true;
                            in_workout = true;
                            depth = 0;
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Empty(ref e)) => {
                if in_workout && depth == 0 {
                    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                    intervals.extend(parse_block(&name, e, block_index)?);
                    block_index += 1;
                } else if !in_workout && e.name().as_ref() == b"workout" {
                    saw_workout = true;
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(ref elem) = current_element {
                    let text = e.unescape().map_err(|e| {
                        WorkoutParseError::InvalidXml(format!("Failed to unescape text: {}", e))
                    })?;
                    match elem.as_str() {
                        "name" => workout_name = Some(text.to_string()),
                        "description" => workout_description = Some(text.to_string()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                if in_workout {
                    if depth == 0 && e.name().as_ref() == b"workout" {
                        in_workout = false;
                    } else {
                        depth = depth.saturating_sub(1);
                    }
                }
                current_element = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(WorkoutParseError::InvalidXml(format!(
                    "XML parsing error: {}",
                    e
                )));
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_workout {
        return Err(WorkoutParseError::MissingField("workout".to_string()));
    }
    if intervals.is_empty() {
        return Err(WorkoutParseError::EmptyWorkout);
    }
    let total: u64 = intervals.iter().map(|i| u64::from(i.duration_seconds)).sum();
    if total > MAX_WORKOUT_SECONDS {
        return Err(WorkoutParseError::InvalidValue {
            field: "workout duration".to_string(),
            value: total.to_string(),
        });
    }

    let name = workout_name.unwrap_or_else(|| "Imported Workout".to_string());
    let mut template = WorkoutTemplate::new(name, intervals)
        .map_err(|e| WorkoutParseError::InvalidXml(e.to_string()))?;
    template.description = workout_description;
    Ok(template)
}

/// Read and convert an attribute, `None` when absent.
fn attr<T: FromStr>(event: &BytesStart<'_>, key: &str) -> Result<Option<T>, WorkoutParseError> {
    for attr in event.attributes().flatten() {
        if attr.key.as_ref() == key.as_bytes() {
            let value = String::from_utf8_lossy(&attr.value);
            return value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| WorkoutParseError::InvalidValue {
                    field: key.to_string(),
                    value: value.to_string(),
                });
        }
    }
    Ok(None)
}

/// A `u32` attribute that must not exceed `max`.
fn bounded(
    event: &BytesStart<'_>,
    key: &str,
    default: u32,
    max: u32,
) -> Result<u32, WorkoutParseError> {
    let value: u32 = attr(event, key)?.unwrap_or(default);
    if value > max {
        return Err(WorkoutParseError::InvalidValue {
            field: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn percent(fraction: f64) -> PowerTarget {
    PowerTarget::percent_ftp((fraction * 100.0).round().max(0.0) as u16)
}

fn cadence_band(center: Option<u16>) -> Option<CadenceTarget> {
    center.map(|c| CadenceTarget {
        min_rpm: c.saturating_sub(5),
        max_rpm: c.saturating_add(5),
    })
}

fn block_cadence(event: &BytesStart<'_>) -> Result<Option<CadenceTarget>, WorkoutParseError> {
    let low: Option<u16> = attr(event, "CadenceLow")?;
    let high: Option<u16> = attr(event, "CadenceHigh")?;
    if let (Some(min_rpm), Some(max_rpm)) = (low, high) {
        return Ok(Some(CadenceTarget { min_rpm, max_rpm }));
    }
    Ok(cadence_band(attr(event, "Cadence")?))
}

/// Convert one block into zero or more intervals. Unknown blocks and
/// zero-length intervals yield nothing.
fn parse_block(
    element_name: &str,
    event: &BytesStart<'_>,
    index: usize,
) -> Result<Vec<WorkoutInterval>, WorkoutParseError> {
    let duration = bounded(event, "Duration", 0, MAX_BLOCK_SECONDS)?;

    let interval = match element_name {
        "SteadyState" => {
            let power: f64 = attr(event, "Power")?.unwrap_or(0.5);
            WorkoutInterval::new(index.to_string(), "Steady State", duration, percent(power))
        }
        "Warmup" | "Cooldown" => {
            let low: f64 = attr(event, "PowerLow")?.unwrap_or(0.25);
            let high: f64 = attr(event, "PowerHigh")?.unwrap_or(0.75);
            WorkoutInterval::new(
                index.to_string(),
                element_name,
                duration,
                percent((low + high) / 2.0),
            )
        }
        "FreeRide" => {
            WorkoutInterval::new(index.to_string(), "Free Ride", duration, PowerTarget::absolute(0))
        }
        "IntervalsT" => return parse_intervals(event, index),
        _ => {
            tracing::debug!("Skipping unsupported ZWO block {}", element_name);
            return Ok(Vec::new());
        }
    };

    if interval.duration_seconds == 0 {
        return Ok(Vec::new());
    }
    Ok(vec![WorkoutInterval {
        cadence: block_cadence(event)?,
        ..interval
    }])
}

/// Expand an `IntervalsT` block into ON/REST pairs.
fn parse_intervals(
    event: &BytesStart<'_>,
    index: usize,
) -> Result<Vec<WorkoutInterval>, WorkoutParseError> {
    let repeat = bounded(event, "Repeat", 1, MAX_REPEAT)?;
    let on_duration = bounded(event, "OnDuration", 0, MAX_BLOCK_SECONDS)?;
    let off_duration = bounded(event, "OffDuration", 0, MAX_BLOCK_SECONDS)?;
    let on_power: f64 = attr(event, "OnPower")?.unwrap_or(1.0);
    let off_power: f64 = attr(event, "OffPower")?.unwrap_or(0.5);
    let on_cadence = cadence_band(attr(event, "Cadence")?);
    let off_cadence = cadence_band(attr(event, "CadenceResting")?);

    let mut intervals = Vec::new();
    for r in 0..repeat {
        if on_duration > 0 {
            intervals.push(WorkoutInterval {
                cadence: on_cadence,
                ..WorkoutInterval::new(
                    format!("{}-{}-on", index, r),
                    format!("Interval {} - ON", r + 1),
                    on_duration,
                    percent(on_power),
                )
            });
        }
        if off_duration > 0 {
            intervals.push(WorkoutInterval {
                cadence: off_cadence,
                ..WorkoutInterval::new(
                    format!("{}-{}-off", index, r),
                    format!("Interval {} - REST", r + 1),
                    off_duration,
                    percent(off_power),
                )
            });
        }
    }
    Ok(intervals)
}

/// Parse a ZWO file from disk.
pub fn parse_zwo_file(path: &std::path::Path) -> Result<WorkoutTemplate, WorkoutParseError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| WorkoutParseError::IoError(e.to_string()))?;
    parse_zwo(&content)
}

/// Write a template as ZWO. Every interval becomes a `SteadyState` block,
/// except absolute zero targets which become `FreeRide`. Absolute targets
/// need `ftp` to be expressed as fractions.
pub fn export_zwo(template: &WorkoutTemplate, ftp: Option<u16>) -> Result<String, ExportError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let xml = |e: quick_xml::Error| ExportError::XmlError(e.to_string());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml)?;
    writer
        .write_event(Event::Start(BytesStart::new("workout_file")))
        .map_err(xml)?;

    for (tag, value) in [
        ("name", template.name.as_str()),
        ("description", template.description.as_deref().unwrap_or("")),
        ("sportType", "bike"),
    ] {
        writer
            .write_event(Event::Start(BytesStart::new(tag)))
            .map_err(xml)?;
        writer
            .write_event(Event::Text(BytesText::new(value)))
            .map_err(xml)?;
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(xml)?;
    }

    writer
        .write_event(Event::Start(BytesStart::new("workout")))
        .map_err(xml)?;

    for interval in &template.intervals {
        let duration = interval.duration_seconds.to_string();
        let block = if interval.target.is_free_ride() {
            let mut block = BytesStart::new("FreeRide");
            block.push_attribute(("Duration", duration.as_str()));
            block
        } else {
            let fraction = interval
                .target
                .to_ftp_fraction(ftp)
                .ok_or(ExportError::FtpRequired)?;
            let power = format!("{:.2}", fraction);
            let mut block = BytesStart::new("SteadyState");
            block.push_attribute(("Duration", duration.as_str()));
            block.push_attribute(("Power", power.as_str()));
            if let Some(cadence) = interval.cadence {
                let center = ((cadence.min_rpm + cadence.max_rpm) / 2).to_string();
                block.push_attribute(("Cadence", center.as_str()));
            }
            block
        };
        writer.write_event(Event::Empty(block)).map_err(xml)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("workout")))
        .map_err(xml)?;
    writer
        .write_event(Event::End(BytesEnd::new("workout_file")))
        .map_err(xml)?;

    String::from_utf8(writer.into_inner().into_inner())
        .map_err(|e| ExportError::XmlError(e.to_string()))
}
