//! Trainer and heart rate sessions against simulated devices.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::unbounded;
use ridecontrol::sensors::{
    supervise, ConnectionState, ControlBehavior, DeviceSession, HeartRateSession, SensorConfig,
    SensorError, SensorEvent, SensorType, SimulatedAdapter, SimulatedHeartRateConfig,
    SimulatedTrainerConfig, TrainerSession,
};

use crate::support::{test_config, wait_for, wait_state};

fn trainer_adapter(control: ControlBehavior, fail_writes: bool) -> Arc<SimulatedAdapter> {
    Arc::new(SimulatedAdapter::new().with_trainer(SimulatedTrainerConfig {
        interval: Duration::from_millis(20),
        control,
        fail_writes,
        ..Default::default()
    }))
}

async fn connected_trainer(adapter: &Arc<SimulatedAdapter>) -> TrainerSession {
    let session = TrainerSession::new(adapter.clone(), test_config());
    let (tx, _rx) = unbounded();
    session.connect(tx).await.unwrap();
    session
}

#[tokio::test]
async fn test_granted_control_sets_erg_target() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = connected_trainer(&adapter).await;
    let device = adapter.trainer().unwrap();

    assert!(session.supports_control());
    assert!(!session.has_control());

    session.set_target_power(199.6).await.unwrap();
    assert!(session.has_control());
    assert_eq!(device.target_power(), Some(200));
    assert_eq!(device.writes(), vec![vec![0x00], vec![0x05, 0xC8, 0x00]]);

    // Control is kept; no second request
    session.set_target_resistance(7.5).await.unwrap();
    assert_eq!(device.resistance_tenths(), Some(75));
    assert_eq!(device.writes().len(), 3);
}

#[tokio::test]
async fn test_denied_control_sends_no_target() {
    let adapter = trainer_adapter(ControlBehavior::Deny, false);
    let session = connected_trainer(&adapter).await;
    let device = adapter.trainer().unwrap();

    assert_eq!(
        session.set_target_power(250.0).await,
        Err(SensorError::ControlDenied)
    );
    assert_eq!(device.writes(), vec![vec![0x00]]);
    assert_eq!(device.target_power(), None);
}

#[tokio::test]
async fn test_missing_ack_counts_as_denied() {
    let adapter = trainer_adapter(ControlBehavior::Silent, false);
    let session = connected_trainer(&adapter).await;

    let started = std::time::Instant::now();
    assert_eq!(session.request_control().await, Ok(false));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(
        session.set_target_resistance(3.0).await,
        Err(SensorError::ControlDenied)
    );
}

#[tokio::test]
async fn test_trainer_without_control_point() {
    let adapter = trainer_adapter(ControlBehavior::Absent, false);
    let session = connected_trainer(&adapter).await;
    let device = adapter.trainer().unwrap();

    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(!session.supports_control());
    assert_eq!(session.request_control().await, Ok(false));
    assert_eq!(
        session.set_target_power(150.0).await,
        Err(SensorError::ControlDenied)
    );
    assert!(device.writes().is_empty());
}

#[tokio::test]
async fn test_write_failure_is_command_rejected() {
    let adapter = trainer_adapter(ControlBehavior::Grant, true);
    let session = connected_trainer(&adapter).await;

    assert!(matches!(
        session.set_target_power(200.0).await,
        Err(SensorError::CommandRejected(_))
    ));
}

#[tokio::test]
async fn test_targets_need_a_link_and_a_valid_value() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = TrainerSession::new(adapter.clone(), test_config());

    assert_eq!(
        session.set_target_power(200.0).await,
        Err(SensorError::NotConnected)
    );
    assert_eq!(session.request_control().await, Err(SensorError::NotConnected));

    let session = connected_trainer(&adapter).await;
    assert!(matches!(
        session.set_target_resistance(25.0).await,
        Err(SensorError::InvalidTarget(_))
    ));
    assert!(matches!(
        session.set_target_power(40_000.0).await,
        Err(SensorError::InvalidTarget(_))
    ));
    assert!(adapter.trainer().unwrap().writes().is_empty());
}

#[tokio::test]
async fn test_telemetry_reaches_channel() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = TrainerSession::new(adapter.clone(), test_config());
    let (tx, rx) = unbounded();
    session.connect(tx).await.unwrap();

    let connected = wait_for(&rx, |e| {
        matches!(
            e,
            SensorEvent::ConnectionChanged {
                sensor: SensorType::Trainer,
                state: ConnectionState::Connected
            }
        )
    })
    .await;
    assert!(connected.is_some());

    let frame = wait_for(&rx, |e| matches!(e, SensorEvent::Trainer(_))).await;
    match frame {
        Some(SensorEvent::Trainer(frame)) => {
            assert_eq!(frame.power_watts, 150);
            assert!(frame.cadence_rpm >= 90.0);
        }
        other => panic!("expected trainer frame, got {:?}", other),
    }

    session.set_target_power(230.0).await.unwrap();
    let erg = wait_for(&rx, |e| {
        matches!(e, SensorEvent::Trainer(f) if f.power_watts == 230)
    })
    .await;
    assert!(erg.is_some());

    let identity = session.identity().unwrap();
    assert_eq!(identity.id, "sim-trainer");
}

#[tokio::test]
async fn test_link_loss_and_caller_disconnect() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = TrainerSession::new(adapter.clone(), test_config());
    let (tx, rx) = unbounded();
    session.connect(tx.clone()).await.unwrap();
    session.request_control().await.unwrap();

    adapter.trainer().unwrap().drop_link();
    let lost = wait_for(&rx, |e| {
        matches!(
            e,
            SensorEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
                ..
            }
        )
    })
    .await;
    assert!(lost.is_some());
    assert!(session.link_lost());
    assert!(session.identity().is_none());
    assert!(!session.has_control());
    assert!(!session.supports_control());

    // Reconnecting starts without control
    session.connect(tx).await.unwrap();
    assert!(!session.link_lost());
    assert!(!session.has_control());

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.link_lost());
    assert!(!adapter.trainer().unwrap().is_connected());

    // Disconnecting twice is harmless
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_supervisor_reconnects_after_link_loss() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = Arc::new(TrainerSession::new(adapter.clone(), test_config()));
    let (tx, rx) = unbounded();
    session.connect(tx.clone()).await.unwrap();
    let supervisor = tokio::spawn(supervise(session.clone(), tx, test_config()));

    adapter.trainer().unwrap().drop_link();
    let lost = wait_for(&rx, |e| {
        matches!(
            e,
            SensorEvent::ConnectionChanged {
                state: ConnectionState::Disconnected,
                ..
            }
        )
    })
    .await;
    assert!(lost.is_some());
    assert!(wait_state(session.as_ref(), ConnectionState::Connected).await);
    assert!(adapter.trainer().unwrap().is_connected());

    // Frames flow again on the new link
    while rx.try_recv().is_ok() {}
    assert!(wait_for(&rx, |e| matches!(e, SensorEvent::Trainer(_)))
        .await
        .is_some());

    supervisor.abort();
}

#[tokio::test]
async fn test_supervisor_respects_disabled_reconnect() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let config = SensorConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let session = Arc::new(TrainerSession::new(adapter.clone(), config.clone()));
    let (tx, _rx) = unbounded();
    session.connect(tx.clone()).await.unwrap();
    let supervisor = tokio::spawn(supervise(session.clone(), tx, config));

    adapter.trainer().unwrap().drop_link();
    assert!(wait_state(session.as_ref(), ConnectionState::Disconnected).await);
    assert!(tokio::time::timeout(Duration::from_secs(2), supervisor)
        .await
        .is_ok());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_supervisor_started_after_link_loss_still_reconnects() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let session = Arc::new(TrainerSession::new(adapter.clone(), test_config()));
    let (tx, _rx) = unbounded();
    session.connect(tx.clone()).await.unwrap();

    adapter.trainer().unwrap().drop_link();
    assert!(wait_state(session.as_ref(), ConnectionState::Disconnected).await);
    assert!(session.link_lost());

    let supervisor = tokio::spawn(supervise(session.clone(), tx, test_config()));
    assert!(wait_state(session.as_ref(), ConnectionState::Connected).await);
    assert!(!session.link_lost());

    supervisor.abort();
}

#[tokio::test]
async fn test_supervisor_started_after_link_loss_returns_when_disabled() {
    let adapter = trainer_adapter(ControlBehavior::Grant, false);
    let config = SensorConfig {
        auto_reconnect: false,
        ..test_config()
    };
    let session = Arc::new(TrainerSession::new(adapter.clone(), config.clone()));
    let (tx, _rx) = unbounded();
    session.connect(tx.clone()).await.unwrap();

    adapter.trainer().unwrap().drop_link();
    assert!(wait_state(session.as_ref(), ConnectionState::Disconnected).await);

    let supervisor = tokio::spawn(supervise(session.clone(), tx, config));
    assert!(tokio::time::timeout(Duration::from_secs(2), supervisor)
        .await
        .is_ok());
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_heart_rate_session() {
    let adapter = Arc::new(
        SimulatedAdapter::new().with_heart_rate(SimulatedHeartRateConfig {
            interval: Duration::from_millis(20),
            base_bpm: 130,
            ..Default::default()
        }),
    );
    let session = HeartRateSession::new(adapter.clone(), test_config());
    let (tx, rx) = unbounded();
    session.connect(tx).await.unwrap();
    assert_eq!(session.sensor_type(), SensorType::HeartRate);

    match wait_for(&rx, |e| matches!(e, SensorEvent::HeartRate(_))).await {
        Some(SensorEvent::HeartRate(frame)) => {
            assert!((130..140).contains(&frame.heart_rate_bpm));
            assert!(frame.contact_detected);
        }
        other => panic!("expected heart rate frame, got {:?}", other),
    }

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_missing_device_is_unavailable() {
    let adapter = Arc::new(SimulatedAdapter::new());
    let session = HeartRateSession::new(adapter, test_config());
    let (tx, _rx) = unbounded();
    assert!(matches!(
        session.connect(tx).await,
        Err(SensorError::DeviceUnavailable(_))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
