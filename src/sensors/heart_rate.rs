//! Heart rate strap device session.

use async_trait::async_trait;
use chrono::Utc;
use crossbeam::channel::Sender;
use std::sync::Arc;
use tokio::sync::watch;

use crate::sensors::hrs::{
    parse_heart_rate_measurement, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::sensors::link::{pump_notifications, DeviceLink, LinkShared};
use crate::sensors::transport::{GattAdapter, GattPeripheral};
use crate::sensors::types::{
    ConnectionState, DeviceIdentity, SensorConfig, SensorError, SensorEvent, SensorType,
};
use crate::sensors::DeviceSession;

/// Connection to a single heart rate strap. Telemetry only.
pub struct HeartRateSession {
    adapter: Arc<dyn GattAdapter>,
    config: SensorConfig,
    link: Arc<LinkShared>,
}

impl HeartRateSession {
    pub fn new(adapter: Arc<dyn GattAdapter>, config: SensorConfig) -> Self {
        Self {
            adapter,
            config,
            link: Arc::new(LinkShared::new(SensorType::HeartRate)),
        }
    }

    async fn establish(
        &self,
        peripheral: Arc<dyn GattPeripheral>,
        events: Sender<SensorEvent>,
    ) -> Result<(), SensorError> {
        tokio::time::timeout(self.config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| SensorError::DeviceUnavailable("connection timed out".to_string()))?
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        let measurements = peripheral
            .subscribe(HEART_RATE_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID)
            .await
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        let generation = self.link.next_generation();
        let mut link = DeviceLink::new(peripheral, generation);
        link.spawn(pump_notifications(
            self.link.clone(),
            generation,
            measurements,
            events,
            |data| parse_heart_rate_measurement(data, Utc::now()).map(SensorEvent::HeartRate),
        ));
        self.link.install(link).await;
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for HeartRateSession {
    fn sensor_type(&self) -> SensorType {
        SensorType::HeartRate
    }

    async fn connect(&self, events: Sender<SensorEvent>) -> Result<(), SensorError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.link.set_events(events.clone());
        self.link.set_state(ConnectionState::Connecting);

        let peripheral = match self.adapter.select_device(HEART_RATE_SERVICE_UUID).await {
            Ok(p) => p,
            Err(e) => {
                self.link.set_state(ConnectionState::Disconnected);
                return Err(SensorError::DeviceUnavailable(e.to_string()));
            }
        };

        if let Err(e) = self.establish(peripheral.clone(), events).await {
            tracing::error!("Heart rate connection failed: {}", e);
            let _ = peripheral.disconnect().await;
            self.link.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        tracing::info!("Connected to heart rate strap {}", peripheral.identity().name);
        Ok(())
    }

    async fn disconnect(&self) {
        tracing::info!("Disconnecting heart rate strap");
        self.link.teardown().await;
    }

    fn state(&self) -> ConnectionState {
        self.link.state()
    }

    fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.link.subscribe_state()
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.link.identity()
    }

    fn link_lost(&self) -> bool {
        self.link.link_lost()
    }
}
