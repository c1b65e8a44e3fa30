//! Six-zone power classification relative to FTP.

use serde::{Deserialize, Serialize};

/// Power zone by percentage of FTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerZone {
    /// Active Recovery (<55% FTP)
    Z1,
    /// Endurance (55-75% FTP)
    Z2,
    /// Tempo (75-90% FTP)
    Z3,
    /// Threshold (90-105% FTP)
    Z4,
    /// VO2max (105-120% FTP)
    Z5,
    /// Anaerobic (>=120% FTP)
    Z6,
}

impl PowerZone {
    pub const ALL: [PowerZone; 6] = [
        PowerZone::Z1,
        PowerZone::Z2,
        PowerZone::Z3,
        PowerZone::Z4,
        PowerZone::Z5,
        PowerZone::Z6,
    ];

    /// Zone number, 1-6.
    pub fn number(&self) -> u8 {
        *self as u8 + 1
    }

    pub fn name(&self) -> &'static str {
        match self {
            PowerZone::Z1 => "Active Recovery",
            PowerZone::Z2 => "Endurance",
            PowerZone::Z3 => "Tempo",
            PowerZone::Z4 => "Threshold",
            PowerZone::Z5 => "VO2max",
            PowerZone::Z6 => "Anaerobic",
        }
    }

    /// Lower bound as a percentage of FTP (inclusive).
    pub fn min_percent(&self) -> f64 {
        match self {
            PowerZone::Z1 => 0.0,
            PowerZone::Z2 => 55.0,
            PowerZone::Z3 => 75.0,
            PowerZone::Z4 => 90.0,
            PowerZone::Z5 => 105.0,
            PowerZone::Z6 => 120.0,
        }
    }

    pub fn from_percent(percent: f64) -> Self {
        if percent < 55.0 {
            PowerZone::Z1
        } else if percent < 75.0 {
            PowerZone::Z2
        } else if percent < 90.0 {
            PowerZone::Z3
        } else if percent < 105.0 {
            PowerZone::Z4
        } else if percent < 120.0 {
            PowerZone::Z5
        } else {
            PowerZone::Z6
        }
    }
}

impl std::fmt::Display for PowerZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Z{} {}", self.number(), self.name())
    }
}

/// Zone for `power` watts, or `None` without a usable FTP.
pub fn zone_for_power(power: f64, ftp: u16) -> Option<PowerZone> {
    if ftp == 0 {
        return None;
    }
    Some(PowerZone::from_percent(power / f64::from(ftp) * 100.0))
}
