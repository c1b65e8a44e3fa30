//! Helpers shared by the integration tests.

use std::time::Duration;

use crossbeam::channel::Receiver;
use ridecontrol::sensors::{ConnectionState, DeviceSession, SensorConfig};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn test_config() -> SensorConfig {
    SensorConfig {
        connection_timeout: Duration::from_secs(1),
        control_ack_timeout: Duration::from_millis(100),
        reconnect_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Poll `rx` until `pred` accepts a message or the wait runs out.
pub async fn wait_for<T, F>(rx: &Receiver<T>, mut pred: F) -> Option<T>
where
    F: FnMut(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        while let Ok(msg) = rx.try_recv() {
            if pred(&msg) {
                return Some(msg);
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

/// Poll until `check` holds or the wait runs out.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub async fn wait_state(session: &dyn DeviceSession, state: ConnectionState) -> bool {
    eventually(|| session.state() == state).await
}
