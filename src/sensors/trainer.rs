//! Smart trainer device session.
//!
//! Owns the FTMS link: telemetry notifications are decoded and pushed onto the
//! caller's channel, and the control point is used for ERG and resistance
//! targets once the trainer has granted control.

use async_trait::async_trait;
use chrono::Utc;
use crossbeam::channel::Sender;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};

use crate::sensors::ftms::{
    build_request_control, build_set_target_power, build_set_target_resistance,
    parse_control_point_response, parse_indoor_bike_data, FtmsControlOpcode,
    FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};
use crate::sensors::link::{pump_notifications, wait_until_disconnected, DeviceLink, LinkShared};
use crate::sensors::transport::{GattAdapter, GattPeripheral, NotificationStream};
use crate::sensors::types::{
    ConnectionState, DeviceIdentity, SensorConfig, SensorError, SensorEvent, SensorType,
};
use crate::sensors::DeviceSession;

/// Highest resistance level the control point accepts.
pub const MAX_RESISTANCE_LEVEL: f64 = 20.0;

struct TrainerShared {
    link: Arc<LinkShared>,
    has_control: AtomicBool,
    control_point: AtomicBool,
    control_ack: Notify,
}

/// Connection to a single FTMS trainer.
pub struct TrainerSession {
    adapter: Arc<dyn GattAdapter>,
    config: SensorConfig,
    shared: Arc<TrainerShared>,
}

impl TrainerSession {
    pub fn new(adapter: Arc<dyn GattAdapter>, config: SensorConfig) -> Self {
        Self {
            adapter,
            config,
            shared: Arc::new(TrainerShared {
                link: Arc::new(LinkShared::new(SensorType::Trainer)),
                has_control: AtomicBool::new(false),
                control_point: AtomicBool::new(false),
                control_ack: Notify::new(),
            }),
        }
    }

    /// Whether the trainer has granted control on the current link.
    pub fn has_control(&self) -> bool {
        self.link_up() && self.shared.has_control.load(Ordering::SeqCst)
    }

    /// Whether the current link has an active control point subscription.
    pub fn supports_control(&self) -> bool {
        self.link_up() && self.shared.control_point.load(Ordering::SeqCst)
    }

    // Both flags belong to a live link; a lost link may leave them set
    // until the next `establish`.
    fn link_up(&self) -> bool {
        self.shared.link.state() == ConnectionState::Connected
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

        let telemetry = peripheral
            .subscribe(FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID)
            .await
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        let control = match peripheral
            .subscribe(FTMS_SERVICE_UUID, FTMS_CONTROL_POINT_UUID)
            .await
        {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("Trainer control point unavailable, ERG disabled: {}", e);
                None
            }
        };

        let generation = self.shared.link.next_generation();
        let mut link = DeviceLink::new(peripheral, generation);

        link.spawn(pump_notifications(
            self.shared.link.clone(),
            generation,
            telemetry,
            events,
            |data| parse_indoor_bike_data(data, Utc::now()).map(SensorEvent::Trainer),
        ));

        self.shared.has_control.store(false, Ordering::SeqCst);
        self.shared
            .control_point
            .store(control.is_some(), Ordering::SeqCst);
        if let Some(stream) = control {
            link.spawn(handle_control_point(self.shared.clone(), stream));
        }

        self.shared.link.install(link).await;
        Ok(())
    }

    /// Ask the trainer for control and wait a bounded interval for the ack.
    ///
    /// An ack that never arrives counts as not granted. Disconnection ends
    /// the wait immediately.
    pub async fn request_control(&self) -> Result<bool, SensorError> {
        let peripheral = self
            .shared
            .link
            .peripheral()
            .await
            .ok_or(SensorError::NotConnected)?;

        if !self.supports_control() {
            tracing::debug!("Control requested but trainer has no control point");
            return Ok(false);
        }

        let ack = self.shared.control_ack.notified();
        tokio::pin!(ack);
        ack.as_mut().enable();

        peripheral
            .write(
                FTMS_SERVICE_UUID,
                FTMS_CONTROL_POINT_UUID,
                &build_request_control(),
            )
            .await
            .map_err(|e| SensorError::CommandRejected(e.to_string()))?;

        let disconnected = wait_until_disconnected(self.shared.link.subscribe_state());
        tokio::select! {
            _ = tokio::time::sleep(self.config.control_ack_timeout) => {}
            _ = &mut ack => {}
            _ = disconnected => {
                tracing::debug!("Trainer disconnected while waiting for control");
                return Ok(false);
            }
        }

        let granted = self.has_control();
        if granted {
            tracing::info!("Trainer control granted");
        } else {
            tracing::warn!("Trainer control not granted");
        }
        Ok(granted)
    }

    async fn ensure_control(&self) -> Result<Arc<dyn GattPeripheral>, SensorError> {
        let peripheral = self
            .shared
            .link
            .peripheral()
            .await
            .ok_or(SensorError::NotConnected)?;
        if !self.has_control() && !self.request_control().await? {
            return Err(SensorError::ControlDenied);
        }
        Ok(peripheral)
    }

    /// Set an ERG target in watts, acquiring control first when needed.
    pub async fn set_target_power(&self, watts: f64) -> Result<(), SensorError> {
        let target = encode_target_power(watts)?;
        let peripheral = self.ensure_control().await?;

        peripheral
            .write(
                FTMS_SERVICE_UUID,
                FTMS_CONTROL_POINT_UUID,
                &build_set_target_power(target),
            )
            .await
            .map_err(|e| SensorError::CommandRejected(e.to_string()))?;

        tracing::debug!("Set target power to {}W", target);
        Ok(())
    }

    /// Set a resistance level in `[0, 20]` with 0.1 resolution.
    pub async fn set_target_resistance(&self, level: f64) -> Result<(), SensorError> {
        let tenths = encode_resistance_level(level)?;
        let peripheral = self.ensure_control().await?;

        peripheral
            .write(
                FTMS_SERVICE_UUID,
                FTMS_CONTROL_POINT_UUID,
                &build_set_target_resistance(tenths),
            )
            .await
            .map_err(|e| SensorError::CommandRejected(e.to_string()))?;

        tracing::debug!("Set target resistance to {:.1}", f64::from(tenths) / 10.0);
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for TrainerSession {
    fn sensor_type(&self) -> SensorType {
        SensorType::Trainer
    }

    async fn connect(&self, events: Sender<SensorEvent>) -> Result<(), SensorError> {
        if self.state() == ConnectionState::Connected {
            tracing::debug!("Trainer already connected");
            return Ok(());
        }

        let link = &self.shared.link;
        link.set_events(events.clone());
        link.set_state(ConnectionState::Connecting);

        let peripheral = match self.adapter.select_device(FTMS_SERVICE_UUID).await {
            Ok(p) => p,
            Err(e) => {
                link.set_state(ConnectionState::Disconnected);
                return Err(SensorError::DeviceUnavailable(e.to_string()));
            }
        };

        let identity = peripheral.identity();
        tracing::info!("Connecting to trainer {} ({})", identity.name, identity.id);

        if let Err(e) = self.establish(peripheral.clone(), events).await {
            tracing::error!("Trainer connection failed: {}", e);
            let _ = peripheral.disconnect().await;
            link.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        tracing::info!("Connected to trainer {}", identity.name);
        Ok(())
    }

    async fn disconnect(&self) {
        tracing::info!("Disconnecting trainer");
        self.shared.has_control.store(false, Ordering::SeqCst);
        self.shared.control_point.store(false, Ordering::SeqCst);
        self.shared.link.teardown().await;
    }

    fn state(&self) -> ConnectionState {
        self.shared.link.state()
    }

    fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.link.subscribe_state()
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.shared.link.identity()
    }

    fn link_lost(&self) -> bool {
        self.shared.link.link_lost()
    }
}

/// Round watts to the signed 16-bit value the control point carries.
pub fn encode_target_power(watts: f64) -> Result<i16, SensorError> {
    let rounded = watts.round();
    if !rounded.is_finite() || rounded < f64::from(i16::MIN) || rounded > f64::from(i16::MAX) {
        return Err(SensorError::InvalidTarget(format!("{} W", watts)));
    }
    Ok(rounded as i16)
}

/// Scale a `[0, 20]` resistance level to tenths.
pub fn encode_resistance_level(level: f64) -> Result<u8, SensorError> {
    if !(0.0..=MAX_RESISTANCE_LEVEL).contains(&level) {
        return Err(SensorError::InvalidTarget(format!(
            "resistance level {}",
            level
        )));
    }
    Ok((level * 10.0).round() as u8)
}

/// Track control point acknowledgements for the life of the link.
async fn handle_control_point(shared: Arc<TrainerShared>, mut stream: NotificationStream) {
    while let Some(value) = stream.next().await {
        let Some(response) = parse_control_point_response(&value) else {
            tracing::debug!("Ignoring control point value {:02x?}", value);
            continue;
        };

        if response.acknowledges(FtmsControlOpcode::RequestControl) {
            shared
                .has_control
                .store(response.is_success(), Ordering::SeqCst);
            shared.control_ack.notify_waiters();
        } else if !response.is_success() {
            tracing::warn!(
                "Trainer rejected opcode {:#04x}: {:?}",
                response.request_opcode,
                response.result
            );
        }
    }
    shared.has_control.store(false, Ordering::SeqCst);
}
