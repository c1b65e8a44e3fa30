//! Heart Rate Service (0x180D) measurement decoding.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sensors::ftms::FrameCursor;
use crate::sensors::types::{HeartRateFrame, SensorError};

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

const FLAG_HR_U16: u8 = 0x01;
const FLAG_CONTACT_DETECTED: u8 = 0x02;
const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
const FLAG_ENERGY_EXPENDED: u8 = 0x08;

/// Parse a Heart Rate Measurement notification.
///
/// Energy expended is consumed for offset purposes; RR intervals trail every
/// other field and are left unread.
pub fn parse_heart_rate_measurement(
    data: &[u8],
    received_at: DateTime<Utc>,
) -> Result<HeartRateFrame, SensorError> {
    let mut cursor = FrameCursor::new(data, 0);
    let flags = cursor.u8("flags")?;

    let heart_rate_bpm = if flags & FLAG_HR_U16 != 0 {
        cursor.u16("heart rate")?
    } else {
        u16::from(cursor.u8("heart rate")?)
    };

    if flags & FLAG_ENERGY_EXPENDED != 0 {
        cursor.skip(2, "energy expended")?;
    }

    let contact_detected =
        flags & FLAG_CONTACT_SUPPORTED != 0 && flags & FLAG_CONTACT_DETECTED != 0;

    Ok(HeartRateFrame {
        heart_rate_bpm,
        contact_detected,
        timestamp: received_at,
    })
}

/// Build a Heart Rate Measurement notification.
pub fn encode_heart_rate_measurement(heart_rate_bpm: u16, contact: Option<bool>) -> Vec<u8> {
    let mut flags = 0u8;
    if let Some(detected) = contact {
        flags |= FLAG_CONTACT_SUPPORTED;
        if detected {
            flags |= FLAG_CONTACT_DETECTED;
        }
    }
    match u8::try_from(heart_rate_bpm) {
        Ok(bpm) => vec![flags, bpm],
        Err(_) => {
            let [lo, hi] = heart_rate_bpm.to_le_bytes();
            vec![flags | FLAG_HR_U16, lo, hi]
        }
    }
}
