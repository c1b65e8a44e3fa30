//! Sensor sessions for FTMS trainers and heart rate straps.

pub mod btle;
pub mod ftms;
pub mod heart_rate;
pub mod hrs;
pub(crate) mod link;
pub mod simulated;
pub mod trainer;
pub mod transport;
pub mod types;

use async_trait::async_trait;
use crossbeam::channel::Sender;
use std::sync::Arc;
use tokio::sync::watch;

pub use btle::BtleAdapter;
pub use heart_rate::HeartRateSession;
pub use simulated::{
    ControlBehavior, SimulatedAdapter, SimulatedDevice, SimulatedHeartRateConfig,
    SimulatedTrainerConfig,
};
pub use trainer::TrainerSession;
pub use transport::{GattAdapter, GattPeripheral, NotificationStream};
pub use types::{
    ConnectionState, DeviceIdentity, HeartRateFrame, SensorConfig, SensorError, SensorEvent,
    SensorType, TrainerFrame,
};

/// Lifecycle shared by every device session.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    fn sensor_type(&self) -> SensorType;

    /// Select a device, connect and start forwarding frames to `events`.
    /// A no-op when already connected.
    async fn connect(&self, events: Sender<SensorEvent>) -> Result<(), SensorError>;

    /// Caller-initiated teardown. Never fails; always ends `Disconnected`.
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn state_receiver(&self) -> watch::Receiver<ConnectionState>;

    /// Identity of the connected device, if any.
    fn identity(&self) -> Option<DeviceIdentity>;

    /// True after the link dropped without a caller-initiated disconnect.
    fn link_lost(&self) -> bool;
}

/// Reconnect a session after unsolicited link loss.
///
/// Runs until the session is dropped or reconnection gives up after
/// `max_reconnect_attempts` consecutive failures.
pub async fn supervise(
    session: Arc<dyn DeviceSession>,
    events: Sender<SensorEvent>,
    config: SensorConfig,
) {
    let sensor = session.sensor_type();
    let mut state = session.state_receiver();

    loop {
        // The loss may have happened before this task first ran.
        let current = *state.borrow_and_update();
        if current != ConnectionState::Disconnected || !session.link_lost() {
            if state.changed().await.is_err() {
                return;
            }
            continue;
        }
        if !config.auto_reconnect {
            tracing::info!("{} link lost, auto-reconnect disabled", sensor);
            return;
        }

        let mut recovered = false;
        for attempt in 1..=config.max_reconnect_attempts {
            tokio::time::sleep(config.reconnect_delay).await;
            tracing::info!(
                "Reconnecting {} (attempt {}/{})",
                sensor,
                attempt,
                config.max_reconnect_attempts
            );
            match session.connect(events.clone()).await {
                Ok(()) => {
                    recovered = true;
                    break;
                }
                Err(e) => tracing::warn!("{} reconnect attempt {} failed: {}", sensor, attempt, e),
            }
        }

        if !recovered {
            tracing::error!(
                "Giving up on {} after {} attempts",
                sensor,
                config.max_reconnect_attempts
            );
            return;
        }
    }
}
