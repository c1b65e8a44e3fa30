//! In-process trainer and heart rate strap.
//!
//! Speaks the same FTMS/HRS byte formats as real hardware so the sessions,
//! the controller and the CLI can run without a radio. Control point
//! behaviour is configurable and the link can be dropped on demand.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::sensors::ftms::{
    build_control_point_response, ControlResult, FtmsControlOpcode, IndoorBikeData,
    FTMS_CONTROL_POINT_UUID, FTMS_SERVICE_UUID, INDOOR_BIKE_DATA_UUID,
};
use crate::sensors::hrs::{
    encode_heart_rate_measurement, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::sensors::transport::{GattAdapter, GattPeripheral, NotificationStream};
use crate::sensors::types::{DeviceIdentity, SensorError};

/// How a simulated trainer answers a request for control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBehavior {
    /// Acknowledge with success
    Grant,
    /// Acknowledge with "control not permitted"
    Deny,
    /// Never acknowledge
    Silent,
    /// No control point characteristic at all
    Absent,
}

#[derive(Debug, Clone)]
pub struct SimulatedTrainerConfig {
    pub name: String,
    /// Notification period
    pub interval: Duration,
    pub control: ControlBehavior,
    /// Make every characteristic write fail
    pub fail_writes: bool,
    /// Power produced while no ERG target is set
    pub free_ride_power: i16,
    pub cadence_rpm: f64,
}

impl Default for SimulatedTrainerConfig {
    fn default() -> Self {
        Self {
            name: "Simulated Trainer".to_string(),
            interval: Duration::from_millis(250),
            control: ControlBehavior::Grant,
            fail_writes: false,
            free_ride_power: 150,
            cadence_rpm: 90.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedHeartRateConfig {
    pub name: String,
    pub interval: Duration,
    pub base_bpm: u16,
    /// `None` when contact detection is unsupported
    pub contact: Option<bool>,
}

impl Default for SimulatedHeartRateConfig {
    fn default() -> Self {
        Self {
            name: "Simulated HRM".to_string(),
            interval: Duration::from_secs(1),
            base_bpm: 120,
            contact: Some(true),
        }
    }
}

#[derive(Debug, Clone)]
enum DeviceKind {
    Trainer(SimulatedTrainerConfig),
    HeartRate(SimulatedHeartRateConfig),
}

#[derive(Default)]
struct SimState {
    connected: bool,
    controlling: bool,
    target_power: Option<i16>,
    resistance_tenths: Option<u8>,
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>,
    emitter: Option<JoinHandle<()>>,
}

/// A simulated peripheral.
pub struct SimulatedDevice {
    me: Weak<SimulatedDevice>,
    identity: DeviceIdentity,
    kind: DeviceKind,
    state: Mutex<SimState>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl SimulatedDevice {
    fn new(id: &str, name: String, kind: DeviceKind) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            identity: DeviceIdentity {
                id: id.to_string(),
                name,
            },
            kind,
            state: Mutex::new(SimState::default()),
            writes: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    /// ERG target most recently accepted.
    pub fn target_power(&self) -> Option<i16> {
        self.lock().target_power
    }

    pub fn resistance_tenths(&self) -> Option<u8> {
        self.lock().resistance_tenths
    }

    /// Every value written to the device, oldest first.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Simulate an unsolicited disconnection: every notification stream ends.
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.connected = false;
        state.controlling = false;
        state.subscribers.clear();
        if let Some(emitter) = state.emitter.take() {
            emitter.abort();
        }
    }

    /// Push a raw value to subscribers of `characteristic`. Returns false
    /// when nobody is listening.
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) -> bool {
        let mut state = self.lock();
        match state.subscribers.get(&characteristic) {
            Some(tx) if tx.send(value).is_ok() => true,
            Some(_) => {
                state.subscribers.remove(&characteristic);
                false
            }
            None => false,
        }
    }

    fn offers(&self, service: Uuid, characteristic: Uuid) -> bool {
        match &self.kind {
            DeviceKind::Trainer(cfg) => {
                service == FTMS_SERVICE_UUID
                    && (characteristic == INDOOR_BIKE_DATA_UUID
                        || (characteristic == FTMS_CONTROL_POINT_UUID
                            && cfg.control != ControlBehavior::Absent))
            }
            DeviceKind::HeartRate(_) => {
                service == HEART_RATE_SERVICE_UUID && characteristic == HEART_RATE_MEASUREMENT_UUID
            }
        }
    }

    fn telemetry_characteristic(&self) -> Uuid {
        match &self.kind {
            DeviceKind::Trainer(_) => INDOOR_BIKE_DATA_UUID,
            DeviceKind::HeartRate(_) => HEART_RATE_MEASUREMENT_UUID,
        }
    }

    fn interval(&self) -> Duration {
        match &self.kind {
            DeviceKind::Trainer(cfg) => cfg.interval,
            DeviceKind::HeartRate(cfg) => cfg.interval,
        }
    }

    fn telemetry_frame(&self, tick: u64) -> Vec<u8> {
        match &self.kind {
            DeviceKind::Trainer(cfg) => {
                let power = self.target_power().unwrap_or(cfg.free_ride_power);
                let wobble = (tick % 4) as f64 * 0.5;
                IndoorBikeData {
                    speed_kmh: Some(f64::from(power.max(0)).cbrt() * 5.5),
                    cadence_rpm: Some(cfg.cadence_rpm + wobble),
                    power_watts: Some(power),
                    heart_rate_bpm: None,
                    extra_flags: 0,
                }
                .encode()
            }
            DeviceKind::HeartRate(cfg) => {
                let drift = (tick % 10) as u16;
                encode_heart_rate_measurement(cfg.base_bpm + drift, cfg.contact)
            }
        }
    }

    fn start_emitter(&self) {
        let weak = self.me.clone();
        let characteristic = self.telemetry_characteristic();
        let period = self.interval();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut tick = 0u64;
            loop {
                ticker.tick().await;
                let Some(device) = weak.upgrade() else { break };
                let frame = device.telemetry_frame(tick);
                if !device.notify(characteristic, frame) {
                    break;
                }
                tick += 1;
            }
        });

        if let Some(previous) = self.lock().emitter.replace(task) {
            previous.abort();
        }
    }

    fn handle_control_write(&self, cfg: &SimulatedTrainerConfig, value: &[u8]) {
        let Some(&opcode) = value.first() else { return };
        let ack = match FtmsControlOpcode::from_u8(opcode) {
            Some(FtmsControlOpcode::RequestControl) => match cfg.control {
                ControlBehavior::Grant => {
                    self.lock().controlling = true;
                    Some(ControlResult::Success)
                }
                ControlBehavior::Deny => Some(ControlResult::ControlNotPermitted),
                ControlBehavior::Silent | ControlBehavior::Absent => None,
            },
            Some(FtmsControlOpcode::SetTargetPower) if value.len() >= 3 => {
                let mut state = self.lock();
                if state.controlling {
                    state.target_power = Some(i16::from_le_bytes([value[1], value[2]]));
                    Some(ControlResult::Success)
                } else {
                    Some(ControlResult::ControlNotPermitted)
                }
            }
            Some(FtmsControlOpcode::SetTargetResistanceLevel) if value.len() >= 2 => {
                let mut state = self.lock();
                if state.controlling {
                    state.resistance_tenths = Some(value[1]);
                    state.target_power = None;
                    Some(ControlResult::Success)
                } else {
                    Some(ControlResult::ControlNotPermitted)
                }
            }
            Some(_) => Some(ControlResult::InvalidParameter),
            None => Some(ControlResult::NotSupported),
        };

        if let Some(result) = ack {
            self.notify(
                FTMS_CONTROL_POINT_UUID,
                build_control_point_response(opcode, result),
            );
        }
    }
}

#[async_trait]
impl GattPeripheral for SimulatedDevice {
    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }

    async fn connect(&self) -> Result<(), SensorError> {
        self.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.drop_link();
        Ok(())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError> {
        if !self.is_connected() {
            return Err(SensorError::NotConnected);
        }
        if !self.offers(service, characteristic) {
            return Err(SensorError::DeviceUnavailable(format!(
                "characteristic {} not found",
                characteristic
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.insert(characteristic, tx);

        if characteristic == self.telemetry_characteristic() {
            self.start_emitter();
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), SensorError> {
        if let Ok(mut writes) = self.writes.lock() {
            writes.push(value.to_vec());
        }

        let DeviceKind::Trainer(cfg) = &self.kind else {
            return Err(SensorError::Transport("device has no writable characteristic".into()));
        };
        if cfg.fail_writes {
            return Err(SensorError::Transport("simulated write failure".to_string()));
        }
        if !self.is_connected() {
            return Err(SensorError::NotConnected);
        }
        if !self.offers(service, characteristic) || characteristic != FTMS_CONTROL_POINT_UUID {
            return Err(SensorError::Transport(format!(
                "characteristic {} is not writable",
                characteristic
            )));
        }

        self.handle_control_write(cfg, value);
        Ok(())
    }
}

/// Adapter that "discovers" the configured simulated devices.
#[derive(Default)]
pub struct SimulatedAdapter {
    trainer: Option<Arc<SimulatedDevice>>,
    heart_rate: Option<Arc<SimulatedDevice>>,
}

impl SimulatedAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trainer(mut self, config: SimulatedTrainerConfig) -> Self {
        let name = config.name.clone();
        self.trainer = Some(SimulatedDevice::new(
            "sim-trainer",
            name,
            DeviceKind::Trainer(config),
        ));
        self
    }

    pub fn with_heart_rate(mut self, config: SimulatedHeartRateConfig) -> Self {
        let name = config.name.clone();
        self.heart_rate = Some(SimulatedDevice::new(
            "sim-hrm",
            name,
            DeviceKind::HeartRate(config),
        ));
        self
    }

    pub fn trainer(&self) -> Option<Arc<SimulatedDevice>> {
        self.trainer.clone()
    }

    pub fn heart_rate(&self) -> Option<Arc<SimulatedDevice>> {
        self.heart_rate.clone()
    }
}

#[async_trait]
impl GattAdapter for SimulatedAdapter {
    async fn select_device(&self, service: Uuid) -> Result<Arc<dyn GattPeripheral>, SensorError> {
        let device = if service == FTMS_SERVICE_UUID {
            self.trainer.clone()
        } else if service == HEART_RATE_SERVICE_UUID {
            self.heart_rate.clone()
        } else {
            None
        };

        device
            .map(|d| d as Arc<dyn GattPeripheral>)
            .ok_or_else(|| {
                SensorError::DeviceUnavailable(format!("no simulated device advertises {}", service))
            })
    }
}
