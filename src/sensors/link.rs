//! Connection bookkeeping shared by the trainer and heart-rate sessions.

use crossbeam::channel::Sender;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::sensors::transport::{GattPeripheral, NotificationStream};
use crate::sensors::types::{ConnectionState, DeviceIdentity, SensorError, SensorEvent, SensorType};

/// Everything held while a device is connected. Dropping it stops the
/// notification tasks.
pub(crate) struct DeviceLink {
    pub(crate) peripheral: Arc<dyn GattPeripheral>,
    pub(crate) generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

impl DeviceLink {
    pub(crate) fn new(peripheral: Arc<dyn GattPeripheral>, generation: u64) -> Self {
        Self {
            peripheral,
            generation,
            tasks: Vec::new(),
        }
    }

    pub(crate) fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(tokio::spawn(task));
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// State shared between a session and its background tasks.
pub(crate) struct LinkShared {
    pub(crate) sensor: SensorType,
    slot: tokio::sync::Mutex<Option<DeviceLink>>,
    state: watch::Sender<ConnectionState>,
    identity: Mutex<Option<DeviceIdentity>>,
    events: Mutex<Option<Sender<SensorEvent>>>,
    generation: AtomicU64,
    link_lost: AtomicBool,
}

impl LinkShared {
    pub(crate) fn new(sensor: SensorType) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            sensor,
            slot: tokio::sync::Mutex::new(None),
            state,
            identity: Mutex::new(None),
            events: Mutex::new(None),
            generation: AtomicU64::new(0),
            link_lost: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.lock().ok().and_then(|id| id.clone())
    }

    pub(crate) fn link_lost(&self) -> bool {
        self.link_lost.load(Ordering::SeqCst)
    }

    pub(crate) fn set_events(&self, events: Sender<SensorEvent>) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
    }

    pub(crate) fn emit(&self, event: SensorEvent) {
        let sender = self.events.lock().ok().and_then(|s| s.clone());
        if let Some(tx) = sender {
            let _ = tx.send(event);
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("{} session {} -> {}", self.sensor, previous, state);
            self.emit(SensorEvent::ConnectionChanged {
                sensor: self.sensor,
                state,
            });
        }
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) async fn peripheral(&self) -> Option<Arc<dyn GattPeripheral>> {
        self.slot.lock().await.as_ref().map(|l| l.peripheral.clone())
    }

    /// Store a freshly connected link and publish `Connected`.
    pub(crate) async fn install(&self, link: DeviceLink) {
        let identity = link.peripheral.identity();
        let previous = self.slot.lock().await.replace(link);
        drop(previous);
        if let Ok(mut id) = self.identity.lock() {
            *id = Some(identity);
        }
        self.link_lost.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
    }

    /// Caller-initiated teardown. Always ends in `Disconnected`.
    pub(crate) async fn teardown(&self) {
        let link = self.slot.lock().await.take();
        if let Some(link) = link {
            let peripheral = link.peripheral.clone();
            drop(link);
            if let Err(e) = peripheral.disconnect().await {
                tracing::warn!("{} disconnect reported an error: {}", self.sensor, e);
            }
        }
        self.clear_identity();
        self.link_lost.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
    }

    /// Unsolicited link loss seen by a notification task of `generation`.
    pub(crate) async fn release_lost(&self, generation: u64) {
        let link = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some(link) if link.generation == generation => slot.take(),
                _ => return,
            }
        };
        self.clear_identity();
        self.link_lost.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        // Aborts the calling task too; nothing awaits after this point.
        drop(link);
    }

    fn clear_identity(&self) {
        if let Ok(mut id) = self.identity.lock() {
            *id = None;
        }
    }
}

/// Resolves once the session leaves `Connected`.
pub(crate) async fn wait_until_disconnected(mut state: watch::Receiver<ConnectionState>) {
    loop {
        let current = *state.borrow_and_update();
        if current != ConnectionState::Connected {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

/// Forward decoded notifications until the stream ends, then release the link.
pub(crate) async fn pump_notifications<F>(
    shared: Arc<LinkShared>,
    generation: u64,
    mut stream: NotificationStream,
    events: Sender<SensorEvent>,
    decode: F,
) where
    F: Fn(&[u8]) -> Result<SensorEvent, SensorError> + Send,
{
    while let Some(value) = stream.next().await {
        match decode(&value) {
            Ok(event) => {
                let _ = events.send(event);
            }
            Err(e) => tracing::warn!("Dropping {} frame: {}", shared.sensor, e),
        }
    }

    let err = SensorError::LinkLost(format!("{} notifications ended", shared.sensor));
    tracing::warn!("{}", err);
    shared.release_lost(generation).await;
}
