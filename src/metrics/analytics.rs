//! Post-ride performance analytics.
//!
//! All functions are pure and operate on a recorded timeline or its power
//! values. FTP is always supplied by the caller.

use serde::{Deserialize, Serialize};

use crate::metrics::zones::PowerZone;
use crate::recording::types::{WorkoutSample, WorkoutSummary};

/// Samples in the Normalized Power rolling window.
pub const NP_WINDOW: usize = 30;

/// Normalized Power.
///
/// With fewer than [`NP_WINDOW`] samples this is the plain mean. Otherwise
/// it is the fourth root of the mean of the fourth powers of every trailing
/// 30-sample average.
pub fn normalized_power(power: &[f64]) -> Option<f64> {
    if power.is_empty() {
        return None;
    }
    if power.len() < NP_WINDOW {
        return Some(power.iter().sum::<f64>() / power.len() as f64);
    }

    let mut window_sum: f64 = power[..NP_WINDOW].iter().sum();
    let mut fourth_sum = (window_sum / NP_WINDOW as f64).powi(4);
    for i in NP_WINDOW..power.len() {
        window_sum += power[i] - power[i - NP_WINDOW];
        fourth_sum += (window_sum / NP_WINDOW as f64).powi(4);
    }

    let windows = (power.len() - NP_WINDOW + 1) as f64;
    Some((fourth_sum / windows).powf(0.25))
}

/// Intensity Factor: NP / FTP.
pub fn intensity_factor(normalized_power: f64, ftp: u16) -> Option<f64> {
    (ftp > 0).then(|| normalized_power / f64::from(ftp))
}

/// Training Stress Score: `duration * NP * IF / (FTP * 3600) * 100`.
pub fn training_stress_score(duration_seconds: u32, normalized_power: f64, ftp: u16) -> Option<f64> {
    let intensity = intensity_factor(normalized_power, ftp)?;
    Some(
        f64::from(duration_seconds) * normalized_power * intensity / (f64::from(ftp) * 3600.0)
            * 100.0,
    )
}

/// Samples counted per power zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneDistribution {
    counts: [u32; 6],
}

impl ZoneDistribution {
    pub fn get(&self, zone: PowerZone) -> u32 {
        self.counts[zone as usize]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PowerZone, u32)> + '_ {
        PowerZone::ALL.iter().map(move |z| (*z, self.get(*z)))
    }
}

/// Count samples per zone. Empty when FTP is zero.
pub fn time_in_zones(power: &[f64], ftp: u16) -> ZoneDistribution {
    let mut dist = ZoneDistribution::default();
    if ftp == 0 {
        return dist;
    }
    for p in power {
        let zone = PowerZone::from_percent(p / f64::from(ftp) * 100.0);
        dist.counts[zone as usize] += 1;
    }
    dist
}

/// Power values of a timeline, as floats.
pub fn power_series(samples: &[WorkoutSample]) -> Vec<f64> {
    samples.iter().map(|s| f64::from(s.power_watts)).collect()
}

/// Derive the summary of a finished timeline.
///
/// Distance assumes one sample per second. Heart rate averages only cover
/// samples that carry a reading.
pub fn summarize(samples: &[WorkoutSample], duration_seconds: u32, ftp: Option<u16>) -> WorkoutSummary {
    if samples.is_empty() {
        return WorkoutSummary {
            duration_seconds,
            ..Default::default()
        };
    }

    let n = samples.len() as f64;
    let power = power_series(samples);
    let heart_rates: Vec<u16> = samples.iter().filter_map(|s| s.heart_rate_bpm).collect();

    let normalized = normalized_power(&power);
    let (intensity, tss) = match (normalized, ftp) {
        (Some(np), Some(ftp)) => (
            intensity_factor(np, ftp),
            training_stress_score(duration_seconds, np, ftp),
        ),
        _ => (None, None),
    };

    WorkoutSummary {
        duration_seconds,
        distance_km: samples.iter().map(|s| s.speed_kmh / 3600.0).sum(),
        avg_power: power.iter().sum::<f64>() / n,
        max_power: samples.iter().map(|s| s.power_watts).max().unwrap_or(0),
        normalized_power: normalized,
        avg_heart_rate: (!heart_rates.is_empty()).then(|| {
            heart_rates.iter().map(|&h| f64::from(h)).sum::<f64>() / heart_rates.len() as f64
        }),
        max_heart_rate: heart_rates.iter().copied().max(),
        avg_cadence: samples.iter().map(|s| s.cadence_rpm).sum::<f64>() / n,
        max_cadence: samples.iter().map(|s| s.cadence_rpm).fold(0.0, f64::max),
        tss,
        intensity_factor: intensity,
    }
}
