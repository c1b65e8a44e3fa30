//! btleplug-backed transport.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::sensors::transport::{GattAdapter, GattPeripheral, NotificationStream};
use crate::sensors::types::{DeviceIdentity, SensorError};

/// First Bluetooth LE adapter on the host.
pub struct BtleAdapter {
    adapter: Adapter,
    discovery_timeout: Duration,
}

impl BtleAdapter {
    pub async fn new(discovery_timeout: Duration) -> Result<Self, SensorError> {
        tracing::info!("Initializing Bluetooth adapter");

        let manager = Manager::new()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let adapter = manager
            .adapters()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| SensorError::DeviceUnavailable("no Bluetooth adapter".to_string()))?;

        Ok(Self {
            adapter,
            discovery_timeout,
        })
    }

    async fn advertises(peripheral: &Peripheral, service: Uuid) -> bool {
        matches!(
            peripheral.properties().await,
            Ok(Some(props)) if props.services.contains(&service)
        )
    }

    async fn find_known(&self, service: Uuid) -> Option<Peripheral> {
        let peripherals = self.adapter.peripherals().await.ok()?;
        for peripheral in peripherals {
            if Self::advertises(&peripheral, service).await {
                return Some(peripheral);
            }
        }
        None
    }

    async fn scan_for(&self, service: Uuid) -> Result<Peripheral, SensorError> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let Ok(peripheral) = self.adapter.peripheral(&id).await else {
                continue;
            };
            if Self::advertises(&peripheral, service).await {
                return Ok(peripheral);
            }
        }

        Err(SensorError::DeviceUnavailable(
            "adapter event stream ended".to_string(),
        ))
    }
}

#[async_trait]
impl GattAdapter for BtleAdapter {
    async fn select_device(&self, service: Uuid) -> Result<Arc<dyn GattPeripheral>, SensorError> {
        tracing::info!("Scanning for devices advertising {}", service);

        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        let found = match self.find_known(service).await {
            Some(p) => Ok(p),
            None => tokio::time::timeout(self.discovery_timeout, self.scan_for(service))
                .await
                .unwrap_or_else(|_| {
                    Err(SensorError::DeviceUnavailable(format!(
                        "no device advertising {} within {:?}",
                        service, self.discovery_timeout
                    )))
                }),
        };

        if let Err(e) = self.adapter.stop_scan().await {
            tracing::debug!("Failed to stop scan: {}", e);
        }

        let peripheral = found?;
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name)
            .unwrap_or_else(|| "Unknown Sensor".to_string());

        Ok(Arc::new(BtlePeripheral {
            identity: DeviceIdentity {
                id: peripheral.id().to_string(),
                name,
            },
            peripheral,
        }))
    }
}

/// A btleplug peripheral selected by [`BtleAdapter`].
pub struct BtlePeripheral {
    peripheral: Peripheral,
    identity: DeviceIdentity,
}

impl BtlePeripheral {
    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic, SensorError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == uuid)
            .ok_or_else(|| {
                SensorError::DeviceUnavailable(format!("characteristic {} not found", uuid))
            })
    }
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    async fn connect(&self) -> Result<(), SensorError> {
        self.peripheral
            .connect()
            .await
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError> {
        let target = self.characteristic(service, characteristic)?;

        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        tracing::debug!("Subscribed to characteristic: {}", characteristic);

        let stream = notifications.filter_map(move |n| {
            let value = (n.uuid == characteristic).then_some(n.value);
            async move { value }
        });
        Ok(Box::pin(stream))
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SensorError> {
        let target = self.characteristic(service, characteristic)?;
        self.peripheral
            .write(&target, value, WriteType::WithResponse)
            .await
            .map_err(|e| SensorError::Transport(e.to_string()))
    }
}
