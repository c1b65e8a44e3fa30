//! Ride controller: the single writer that owns the session engine.
//!
//! Sensor events, user commands and the one-second tick all arrive on
//! crossbeam channels and are handled on one thread, so engine state is
//! never shared. ERG targets leave through a tokio channel to
//! [`drive_targets`], which talks to the trainer.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{self, never, select, Receiver, Sender};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::metrics::live::{LiveMetrics, LiveMetricsConfig, LiveSnapshot};
use crate::recording::types::WorkoutRecord;
use crate::sensors::{ConnectionState, DeviceSession, SensorEvent, SensorType, TrainerSession};
use crate::workouts::engine::{SessionEngine, SessionProgress, TickOutcome};
use crate::workouts::types::{SessionStatus, WorkoutTemplate};

/// Requests accepted by the controller thread.
#[derive(Debug, Clone)]
pub enum RideCommand {
    StartFreeRide,
    StartWorkout(WorkoutTemplate),
    Pause,
    Resume,
    Stop,
    Reset,
    Shutdown,
}

impl RideCommand {
    fn label(&self) -> &'static str {
        match self {
            RideCommand::StartFreeRide => "start free ride",
            RideCommand::StartWorkout(_) => "start workout",
            RideCommand::Pause => "pause",
            RideCommand::Resume => "resume",
            RideCommand::Stop => "stop",
            RideCommand::Reset => "reset",
            RideCommand::Shutdown => "shutdown",
        }
    }
}

/// What the controller reports back.
#[derive(Debug, Clone)]
pub enum RideUpdate {
    /// Emitted on every tick while a session is running or paused
    Progress {
        progress: SessionProgress,
        snapshot: LiveSnapshot,
    },
    LinkChanged {
        sensor: SensorType,
        state: ConnectionState,
    },
    /// A command was not valid in the current state
    Rejected {
        command: &'static str,
        reason: String,
    },
    /// The session finished, by stop or by running out of intervals
    Completed(Box<WorkoutRecord>),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Ride controller has shut down")]
    Closed,
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub live_metrics: LiveMetricsConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            live_metrics: LiveMetricsConfig::default(),
        }
    }
}

/// Inputs wired into a controller.
pub struct ControllerInputs {
    pub trainer_events: Option<Receiver<SensorEvent>>,
    pub heart_rate_events: Option<Receiver<SensorEvent>>,
    /// Where ERG targets go; `None` when no trainer is controllable.
    /// `0` releases ERG.
    pub targets: Option<UnboundedSender<u16>>,
}

/// Owner-side handle to a running controller thread.
pub struct ControllerHandle {
    commands: Sender<RideCommand>,
    updates: Receiver<RideUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    pub fn send(&self, command: RideCommand) -> Result<(), ControllerError> {
        self.commands
            .send(command)
            .map_err(|_| ControllerError::Closed)
    }

    pub fn commands(&self) -> Sender<RideCommand> {
        self.commands.clone()
    }

    pub fn updates(&self) -> &Receiver<RideUpdate> {
        &self.updates
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(RideCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Ride controller thread panicked");
            }
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.commands.send(RideCommand::Shutdown);
            let _ = thread.join();
        }
    }
}

/// The controller state living on its own thread.
pub struct RideController {
    engine: SessionEngine,
    live: LiveMetrics,
    links: HashMap<SensorType, ConnectionState>,
    targets: Option<UnboundedSender<u16>>,
    last_target: Option<u16>,
    updates: Sender<RideUpdate>,
}

impl RideController {
    /// Start the controller thread.
    pub fn spawn(
        engine: SessionEngine,
        inputs: ControllerInputs,
        config: ControllerConfig,
    ) -> std::io::Result<ControllerHandle> {
        let (command_tx, command_rx) = channel::unbounded();
        let (update_tx, update_rx) = channel::unbounded();

        let controller = RideController {
            engine,
            live: LiveMetrics::new(config.live_metrics),
            links: HashMap::new(),
            targets: inputs.targets,
            last_target: None,
            updates: update_tx,
        };

        let thread = std::thread::Builder::new()
            .name("ride-controller".to_string())
            .spawn(move || {
                controller.run(
                    inputs.trainer_events,
                    inputs.heart_rate_events,
                    command_rx,
                    config.tick_interval,
                )
            })?;

        Ok(ControllerHandle {
            commands: command_tx,
            updates: update_rx,
            thread: Some(thread),
        })
    }

    fn run(
        mut self,
        mut trainer_rx: Option<Receiver<SensorEvent>>,
        mut heart_rate_rx: Option<Receiver<SensorEvent>>,
        commands: Receiver<RideCommand>,
        tick_interval: Duration,
    ) {
        let ticker = channel::tick(tick_interval);
        let closed = never::<SensorEvent>();
        tracing::debug!("Ride controller running");

        loop {
            let mut hung_up = None;
            let mut shutdown = false;
            select! {
                recv(trainer_rx.as_ref().unwrap_or(&closed)) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => hung_up = Some(SensorType::Trainer),
                },
                recv(heart_rate_rx.as_ref().unwrap_or(&closed)) -> event => match event {
                    Ok(event) => self.handle_event(event),
                    Err(_) => hung_up = Some(SensorType::HeartRate),
                },
                recv(commands) -> command => match command {
                    Ok(RideCommand::Shutdown) | Err(_) => shutdown = true,
                    Ok(command) => self.handle_command(command),
                },
                recv(ticker) -> _ => self.on_tick(),
            }

            if shutdown {
                break;
            }
            match hung_up {
                Some(SensorType::Trainer) => trainer_rx = None,
                Some(SensorType::HeartRate) => heart_rate_rx = None,
                None => {}
            }
        }

        if matches!(
            self.engine.status(),
            SessionStatus::Running | SessionStatus::Paused
        ) {
            tracing::info!("Controller shutting down, stopping active session");
            if let Some(record) = self.engine.stop() {
                self.push_target(None);
                self.emit(RideUpdate::Completed(Box::new(record)));
            }
        }
        tracing::debug!("Ride controller stopped");
    }

    fn handle_event(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::ConnectionChanged { sensor, state } => {
                tracing::info!("{} link {}", sensor, state);
                self.links.insert(sensor, state);
                self.emit(RideUpdate::LinkChanged { sensor, state });
            }
            SensorEvent::Trainer(frame) => self.live.push_trainer(&frame),
            SensorEvent::HeartRate(frame) => self.live.push_heart_rate(&frame),
        }
    }

    fn handle_command(&mut self, command: RideCommand) {
        let label = command.label();
        let result = match command {
            RideCommand::StartFreeRide => self.engine.start_free_ride().map(|()| self.live.reset()),
            RideCommand::StartWorkout(template) => self
                .engine
                .start_workout(template)
                .map(|()| self.live.reset()),
            RideCommand::Pause => self.engine.pause(),
            RideCommand::Resume => self.engine.resume(),
            RideCommand::Stop => {
                if let Some(record) = self.engine.stop() {
                    self.emit(RideUpdate::Completed(Box::new(record)));
                }
                Ok(())
            }
            RideCommand::Reset => {
                self.engine.reset();
                self.live.reset();
                Ok(())
            }
            RideCommand::Shutdown => Ok(()),
        };

        match result {
            Ok(()) => self.push_target(self.active_target()),
            Err(e) => {
                tracing::warn!("{} rejected: {}", label, e);
                self.emit(RideUpdate::Rejected {
                    command: label,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn on_tick(&mut self) {
        match self.engine.tick() {
            TickOutcome::Ignored => {
                if self.engine.status() == SessionStatus::Paused {
                    self.emit_progress();
                }
                return;
            }
            TickOutcome::Ticked => {}
            TickOutcome::IntervalAdvanced { target_power, .. } => self.push_target(target_power),
            TickOutcome::Completed(record) => {
                self.push_target(None);
                self.emit(RideUpdate::Completed(record));
                return;
            }
        }

        if self.link_up() {
            self.engine.add_sample(self.live.reading());
        }
        self.emit_progress();
    }

    /// The engine's target while a session is live, none otherwise.
    fn active_target(&self) -> Option<u16> {
        match self.engine.status() {
            SessionStatus::Running | SessionStatus::Paused => self.engine.target_power(),
            SessionStatus::Idle | SessionStatus::Completed => None,
        }
    }

    fn link_up(&self) -> bool {
        self.links
            .values()
            .any(|state| *state == ConnectionState::Connected)
    }

    /// Forward a changed target. Dropping from a target to none sends 0 so
    /// the trainer stops holding the old watts.
    fn push_target(&mut self, target: Option<u16>) {
        if target == self.last_target {
            return;
        }
        let previous = std::mem::replace(&mut self.last_target, target);
        let watts = match (target, previous) {
            (Some(watts), _) => watts,
            (None, Some(previous)) if previous > 0 => 0,
            (None, _) => return,
        };
        let Some(targets) = &self.targets else {
            return;
        };
        if targets.send(watts).is_err() {
            tracing::warn!("ERG driver gone, dropping {}W target", watts);
        }
    }

    fn emit_progress(&self) {
        self.emit(RideUpdate::Progress {
            progress: self.engine.progress(),
            snapshot: self.live.snapshot(),
        });
    }

    fn emit(&self, update: RideUpdate) {
        // Nobody listening is fine.
        let _ = self.updates.send(update);
    }
}

/// Forward ERG targets to the trainer, re-sending the last one after a reconnect.
///
/// A target of 0 releases ERG by setting resistance level 0, so free-ride
/// intervals and the end of a ride leave the trainer freewheeling.
pub async fn drive_targets(trainer: Arc<TrainerSession>, mut targets: UnboundedReceiver<u16>) {
    let mut state = trainer.state_receiver();
    let mut current: Option<u16> = None;

    loop {
        tokio::select! {
            target = targets.recv() => match target {
                Some(watts) => {
                    current = Some(watts);
                    apply_target(&trainer, watts).await;
                }
                None => break,
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let connected = *state.borrow_and_update() == ConnectionState::Connected;
                if let (true, Some(watts)) = (connected, current.filter(|w| *w > 0)) {
                    tracing::info!("Trainer reconnected, restoring {}W target", watts);
                    apply_target(&trainer, watts).await;
                }
            }
        }
    }
    tracing::debug!("ERG driver stopped");
}

async fn apply_target(trainer: &TrainerSession, watts: u16) {
    if watts == 0 {
        match trainer.set_target_resistance(0.0).await {
            Ok(()) => tracing::debug!("ERG released"),
            Err(e) => tracing::warn!("Failed to release ERG: {}", e),
        }
        return;
    }
    match trainer.set_target_power(watts as f64).await {
        Ok(()) => tracing::debug!("ERG target {}W", watts),
        Err(e) => tracing::warn!("Failed to set {}W target: {}", watts, e),
    }
}
