//! FTMS (Fitness Machine Service) protocol implementation.
//!
//! Indoor Bike Data (0x2AD2) decoding and encoding, plus the Fitness Machine
//! Control Point (0x2AD9) commands and responses used for ERG and resistance
//! control.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sensors::types::{SensorError, TrainerFrame};

/// FTMS Service UUID (0x1826)
pub const FTMS_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1826_0000_1000_8000_0080_5f9b_34fb);

/// Indoor Bike Data Characteristic UUID (0x2AD2)
pub const INDOOR_BIKE_DATA_UUID: Uuid = Uuid::from_u128(0x0000_2ad2_0000_1000_8000_0080_5f9b_34fb);

/// Fitness Machine Control Point UUID (0x2AD9)
pub const FTMS_CONTROL_POINT_UUID: Uuid =
    Uuid::from_u128(0x0000_2ad9_0000_1000_8000_0080_5f9b_34fb);

/// Reads fixed-width little-endian fields, failing when the frame runs out.
pub(crate) struct FrameCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameCursor<'a> {
    pub(crate) fn new(data: &'a [u8], offset: usize) -> Self {
        Self { data, offset }
    }

    fn take(&mut self, width: usize, field: &'static str) -> Result<&'a [u8], SensorError> {
        let end = self.offset + width;
        if end > self.data.len() {
            return Err(SensorError::MalformedFrame {
                field,
                needed: end,
                actual: self.data.len(),
            });
        }
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    pub(crate) fn skip(&mut self, width: usize, field: &'static str) -> Result<(), SensorError> {
        self.take(width, field).map(|_| ())
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, SensorError> {
        Ok(self.take(1, field)?[0])
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, SensorError> {
        let b = self.take(2, field)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn i16(&mut self, field: &'static str) -> Result<i16, SensorError> {
        let b = self.take(2, field)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }
}

/// Indoor Bike Data flags (first 2 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndoorBikeDataFlags {
    /// More data (bit 0); instantaneous speed is present when this is clear
    pub more_data: bool,
    /// Average speed present (bit 1)
    pub avg_speed_present: bool,
    /// Instantaneous cadence present (bit 2)
    pub inst_cadence_present: bool,
    /// Average cadence present (bit 3)
    pub avg_cadence_present: bool,
    /// Total distance present (bit 4)
    pub total_distance_present: bool,
    /// Resistance level present (bit 5)
    pub resistance_level_present: bool,
    /// Instantaneous power present (bit 6)
    pub inst_power_present: bool,
    /// Average power present (bit 7)
    pub avg_power_present: bool,
    /// Expended energy present (bit 8)
    pub expended_energy_present: bool,
    /// Heart rate present (bit 9)
    pub heart_rate_present: bool,
}

impl IndoorBikeDataFlags {
    /// Decode the flag word. Bits above 9 are ignored; their fields trail
    /// every field this crate reads.
    pub fn from_bits(flags: u16) -> Self {
        Self {
            more_data: (flags & 0x0001) != 0,
            avg_speed_present: (flags & 0x0002) != 0,
            inst_cadence_present: (flags & 0x0004) != 0,
            avg_cadence_present: (flags & 0x0008) != 0,
            total_distance_present: (flags & 0x0010) != 0,
            resistance_level_present: (flags & 0x0020) != 0,
            inst_power_present: (flags & 0x0040) != 0,
            avg_power_present: (flags & 0x0080) != 0,
            expended_energy_present: (flags & 0x0100) != 0,
            heart_rate_present: (flags & 0x0200) != 0,
        }
    }

    pub fn bits(&self) -> u16 {
        [
            self.more_data,
            self.avg_speed_present,
            self.inst_cadence_present,
            self.avg_cadence_present,
            self.total_distance_present,
            self.resistance_level_present,
            self.inst_power_present,
            self.avg_power_present,
            self.expended_energy_present,
            self.heart_rate_present,
        ]
        .iter()
        .enumerate()
        .fold(0u16, |acc, (bit, set)| if *set { acc | (1 << bit) } else { acc })
    }
}

/// Parse an Indoor Bike Data notification.
///
/// The data format is:
/// - Bytes 0-1: Flags (indicates which fields are present)
/// - Remaining bytes: Data fields in a fixed order, each gated by its flag
///
/// Speed uses an inverted flag: it is present when bit 0 is clear. Average
/// speed, average cadence, total distance, resistance, average power and
/// expended energy are consumed for offset purposes only. Absent modeled
/// fields decode as zero (heart rate as `None`).
pub fn parse_indoor_bike_data(
    data: &[u8],
    received_at: DateTime<Utc>,
) -> Result<TrainerFrame, SensorError> {
    let mut cursor = FrameCursor::new(data, 0);
    let flags = IndoorBikeDataFlags::from_bits(cursor.u16("flags")?);

    let mut frame = TrainerFrame {
        speed_kmh: 0.0,
        cadence_rpm: 0.0,
        power_watts: 0,
        heart_rate_bpm: None,
        timestamp: received_at,
    };

    // Speed is in 0.01 km/h units
    if !flags.more_data {
        frame.speed_kmh = f64::from(cursor.u16("instantaneous speed")?) / 100.0;
    }
    if flags.avg_speed_present {
        cursor.skip(2, "average speed")?;
    }
    // Cadence is in 0.5 RPM units
    if flags.inst_cadence_present {
        frame.cadence_rpm = f64::from(cursor.u16("instantaneous cadence")?) / 2.0;
    }
    if flags.avg_cadence_present {
        cursor.skip(2, "average cadence")?;
    }
    if flags.total_distance_present {
        cursor.skip(3, "total distance")?;
    }
    if flags.resistance_level_present {
        cursor.skip(2, "resistance level")?;
    }
    if flags.inst_power_present {
        frame.power_watts = cursor.i16("instantaneous power")?;
    }
    if flags.avg_power_present {
        cursor.skip(2, "average power")?;
    }
    // Total energy (2), energy per hour (2), energy per minute (1)
    if flags.expended_energy_present {
        cursor.skip(5, "expended energy")?;
    }
    if flags.heart_rate_present {
        frame.heart_rate_bpm = Some(cursor.u8("heart rate")?);
    }

    Ok(frame)
}

/// Field values for assembling an Indoor Bike Data notification.
///
/// `None` leaves a modeled field out of the frame. `extra_flags` switches on
/// fields this crate does not model; their bytes are filled with a constant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndoorBikeData {
    pub speed_kmh: Option<f64>,
    pub cadence_rpm: Option<f64>,
    pub power_watts: Option<i16>,
    pub heart_rate_bpm: Option<u8>,
    /// Any of bits 1, 3, 4, 5, 7, 8
    pub extra_flags: u16,
}

const UNMODELED_FLAGS: u16 = 0x0002 | 0x0008 | 0x0010 | 0x0020 | 0x0080 | 0x0100;
const FILLER: u8 = 0xEE;

impl IndoorBikeData {
    /// Flag word this frame will carry.
    pub fn flags(&self) -> IndoorBikeDataFlags {
        let mut flags = IndoorBikeDataFlags::from_bits(self.extra_flags & UNMODELED_FLAGS);
        flags.more_data = self.speed_kmh.is_none();
        flags.inst_cadence_present = self.cadence_rpm.is_some();
        flags.inst_power_present = self.power_watts.is_some();
        flags.heart_rate_present = self.heart_rate_bpm.is_some();
        flags
    }

    /// Encode into the on-air byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let flags = self.flags();
        let mut out = flags.bits().to_le_bytes().to_vec();
        let filler = |out: &mut Vec<u8>, n: usize| out.extend(std::iter::repeat(FILLER).take(n));

        if let Some(speed) = self.speed_kmh {
            out.extend_from_slice(&((speed * 100.0).round() as u16).to_le_bytes());
        }
        if flags.avg_speed_present {
            filler(&mut out, 2);
        }
        if let Some(cadence) = self.cadence_rpm {
            out.extend_from_slice(&((cadence * 2.0).round() as u16).to_le_bytes());
        }
        if flags.avg_cadence_present {
            filler(&mut out, 2);
        }
        if flags.total_distance_present {
            filler(&mut out, 3);
        }
        if flags.resistance_level_present {
            filler(&mut out, 2);
        }
        if let Some(power) = self.power_watts {
            out.extend_from_slice(&power.to_le_bytes());
        }
        if flags.avg_power_present {
            filler(&mut out, 2);
        }
        if flags.expended_energy_present {
            filler(&mut out, 5);
        }
        if let Some(hr) = self.heart_rate_bpm {
            out.push(hr);
        }
        out
    }
}

/// FTMS Control Point opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FtmsControlOpcode {
    /// Request control of the fitness machine
    RequestControl = 0x00,
    /// Set target resistance level
    SetTargetResistanceLevel = 0x04,
    /// Set target power
    SetTargetPower = 0x05,
    /// Response from the fitness machine
    ResponseCode = 0x80,
}

impl FtmsControlOpcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::RequestControl),
            0x04 => Some(Self::SetTargetResistanceLevel),
            0x05 => Some(Self::SetTargetPower),
            0x80 => Some(Self::ResponseCode),
            _ => None,
        }
    }
}

/// Result code carried in a control point response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    Success,
    NotSupported,
    InvalidParameter,
    OperationFailed,
    ControlNotPermitted,
    Other(u8),
}

impl ControlResult {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::Success,
            0x02 => Self::NotSupported,
            0x03 => Self::InvalidParameter,
            0x04 => Self::OperationFailed,
            0x05 => Self::ControlNotPermitted,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Success => 0x01,
            Self::NotSupported => 0x02,
            Self::InvalidParameter => 0x03,
            Self::OperationFailed => 0x04,
            Self::ControlNotPermitted => 0x05,
            Self::Other(code) => *code,
        }
    }
}

/// A decoded `[0x80, request opcode, result]` acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPointResponse {
    /// Opcode of the request being acknowledged
    pub request_opcode: u8,
    pub result: ControlResult,
}

impl ControlPointResponse {
    pub fn is_success(&self) -> bool {
        self.result == ControlResult::Success
    }

    pub fn acknowledges(&self, opcode: FtmsControlOpcode) -> bool {
        self.request_opcode == opcode as u8
    }
}

/// Parse a control point indication. Returns `None` for anything that is
/// not a complete response frame.
pub fn parse_control_point_response(data: &[u8]) -> Option<ControlPointResponse> {
    if data.len() < 3 || data[0] != FtmsControlOpcode::ResponseCode as u8 {
        return None;
    }
    Some(ControlPointResponse {
        request_opcode: data[1],
        result: ControlResult::from_u8(data[2]),
    })
}

/// Build the acknowledgement a trainer sends for `request`.
pub fn build_control_point_response(request: u8, result: ControlResult) -> Vec<u8> {
    vec![FtmsControlOpcode::ResponseCode as u8, request, result.code()]
}

/// Build a control point command to request control.
pub fn build_request_control() -> Vec<u8> {
    vec![FtmsControlOpcode::RequestControl as u8]
}

/// Build a control point command to set target power (ERG mode).
pub fn build_set_target_power(target_watts: i16) -> Vec<u8> {
    let mut cmd = vec![FtmsControlOpcode::SetTargetPower as u8];
    cmd.extend_from_slice(&target_watts.to_le_bytes());
    cmd
}

/// Build a control point command to set target resistance level.
///
/// `level_tenths` - Resistance level in 0.1 steps (100 = 10.0)
pub fn build_set_target_resistance(level_tenths: u8) -> Vec<u8> {
    vec![FtmsControlOpcode::SetTargetResistanceLevel as u8, level_tenths]
}
