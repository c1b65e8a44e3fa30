//! Live aggregation and post-ride analytics.

pub mod analytics;
pub mod live;
pub mod zones;

pub use analytics::{
    intensity_factor, normalized_power, summarize, time_in_zones, training_stress_score,
    ZoneDistribution,
};
pub use live::{LiveMetrics, LiveMetricsConfig, LiveSnapshot, RollingBuffer, SampleReading};
pub use zones::{zone_for_power, PowerZone};
