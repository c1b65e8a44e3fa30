//! Generic attribute-profile transport seam.
//!
//! Device sessions only see these traits; `btle` backs them with btleplug and
//! `simulated` with in-process devices.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use uuid::Uuid;

use crate::sensors::types::{DeviceIdentity, SensorError};

/// Characteristic value notifications. The stream ends when the link drops.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Picks a device advertising a given service.
#[async_trait]
pub trait GattAdapter: Send + Sync {
    /// Select a device exposing `service`, or fail with `DeviceUnavailable`.
    async fn select_device(&self, service: Uuid) -> Result<Arc<dyn GattPeripheral>, SensorError>;
}

/// A single selected device.
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    fn identity(&self) -> DeviceIdentity;

    /// Establish the link and discover services.
    async fn connect(&self) -> Result<(), SensorError>;

    async fn disconnect(&self) -> Result<(), SensorError>;

    /// Enable notifications on a characteristic. Fails with
    /// `DeviceUnavailable` when the service or characteristic is missing.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError>;

    /// Write a characteristic value with response.
    async fn write(&self, service: Uuid, characteristic: Uuid, value: &[u8])
        -> Result<(), SensorError>;
}
