use chrono::{DateTime, Local};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use serde::{Deserialize, Serialize};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controller::InputError;

// Raw gamepad event with a chrono timestamp
#[derive(Debug, Clone, PartialEq)]
pub enum RawControllerEvent {
    LeftStick {
        x: f32,
        y: f32,
        timestamp: DateTime<Local>,
    },
    ButtonPressed {
        button_type: ButtonType,
        timestamp: DateTime<Local>,
    },
    GamepadConnected {
        name: String,
    },
    GamepadDisconnected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    A,
    B,
    X,
    Y,
    Start,
    Select,
}

#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
    pub poll_interval: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
            poll_interval: Duration::from_millis(2),
        }
    }
}

/// Hands events to the processor without losing the ones that matter.
///
/// Stick events carry absolute positions, so when the queue is full only the
/// newest one is kept and retried on the next poll. Button and connection
/// events block until there is room, after any held stick position.
#[derive(Debug)]
pub struct EventForwarder {
    sender: mpsc::Sender<RawControllerEvent>,
    pending_stick: Option<RawControllerEvent>,
}

impl EventForwarder {
    pub fn new(sender: mpsc::Sender<RawControllerEvent>) -> Self {
        Self {
            sender,
            pending_stick: None,
        }
    }

    pub fn forward(&mut self, raw_event: RawControllerEvent) -> Result<(), InputError> {
        match raw_event {
            RawControllerEvent::LeftStick { .. } => {
                debug!("Captured event: {:?}", raw_event);
                self.pending_stick = Some(raw_event);
                self.flush_pending()
            }
            other => {
                info!("Gamepad event: {:?}", other);
                if let Some(stick) = self.pending_stick.take() {
                    self.send_blocking(stick)?;
                }
                self.send_blocking(other)
            }
        }
    }

    /// Retries the held stick position without blocking.
    pub fn flush_pending(&mut self) -> Result<(), InputError> {
        let Some(stick) = self.pending_stick.take() else {
            return Ok(());
        };
        match self.sender.try_send(stick) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(stick)) => {
                debug!("Event queue full, holding latest stick position");
                self.pending_stick = Some(stick);
                Ok(())
            }
            Err(e) => Err(InputError::EventSend(e.to_string())),
        }
    }

    fn send_blocking(&self, raw_event: RawControllerEvent) -> Result<(), InputError> {
        self.sender
            .blocking_send(raw_event)
            .map_err(|e| InputError::EventSend(e.to_string()))
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct EventCollector<S: CollectionState> {
    gilrs: Gilrs,

    // Only events from this gamepad are forwarded
    active_gamepad: Option<GamepadId>,

    settings: CollectorSettings,

    forwarder: EventForwarder,

    // Last deadzoned stick values; each axis event carries only one of them
    last_left_stick_x: f32,
    last_left_stick_y: f32,
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<RawControllerEvent>,
    ) -> Result<Self, InputError> {
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(InputError::Initialization(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            None,
            settings,
            EventForwarder::new(event_sender),
            0.0,
            0.0,
        ))
    }

    pub fn initialize(mut self) -> EventCollector<Collecting> {
        info!(
            "Initializing Event Collector with deadzone: {}",
            self.settings.joystick_deadzone
        );

        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();
        if gamepads.is_empty() {
            warn!("No gamepad connected, waiting for one");
        } else {
            for (id, gamepad) in &gamepads {
                info!("  ID: {}, Name: {}", id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
            self.active_gamepad = Some(*id);
        }

        self.transition()
    }
}

impl EventCollector<Collecting> {
    /// Drains every event gilrs has queued since the last poll.
    fn collect_pending_events(&mut self) -> u64 {
        if let Err(e) = self.forwarder.flush_pending() {
            error!("Error forwarding held stick position: {}", e);
        }

        let mut collected = 0;
        while let Some(Event { id, event, .. }) = self.gilrs.next_event() {
            collected += 1;
            if let Err(e) = self.handle_event(id, event) {
                error!("Error collecting event: {}", e);
            }
        }
        collected
    }

    fn handle_event(&mut self, id: GamepadId, event: EventType) -> Result<(), InputError> {
        if let EventType::Connected = event {
            if self.active_gamepad.is_none() {
                let name = self.gilrs.gamepad(id).name().to_string();
                info!("Gamepad connected, selecting {} ({})", name, id);
                self.active_gamepad = Some(id);
                return self
                    .forwarder
                    .forward(RawControllerEvent::GamepadConnected { name });
            }
        }

        if self.active_gamepad != Some(id) {
            debug!("Skipping event from non-active gamepad: {:?}", id);
            return Ok(());
        }

        match self.convert_gilrs_event(event) {
            Some(raw_event) => self.forwarder.forward(raw_event),
            None => Ok(()),
        }
    }

    /// Polls gilrs until `shutdown` fires. Blocks the calling thread.
    pub fn run_collection_loop(&mut self, shutdown: &CancellationToken) {
        info!("Starting Event Collector loop");

        let mut event_count = 0u64;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(30);

        while !shutdown.is_cancelled() {
            event_count += self.collect_pending_events();

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Event Collector stats: {} events in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }

            std::thread::sleep(self.settings.poll_interval);
        }
        info!("Event Collector loop finished");
    }

    fn convert_gilrs_event(&mut self, event: EventType) -> Option<RawControllerEvent> {
        let now = Local::now();

        match event {
            EventType::AxisChanged(Axis::LeftStickX, value, _) => {
                self.last_left_stick_x = apply_deadzone(value, self.settings.joystick_deadzone);
                Some(RawControllerEvent::LeftStick {
                    x: self.last_left_stick_x,
                    y: self.last_left_stick_y,
                    timestamp: now,
                })
            }
            EventType::AxisChanged(Axis::LeftStickY, value, _) => {
                self.last_left_stick_y = apply_deadzone(value, self.settings.joystick_deadzone);
                Some(RawControllerEvent::LeftStick {
                    x: self.last_left_stick_x,
                    y: self.last_left_stick_y,
                    timestamp: now,
                })
            }
            EventType::AxisChanged(axis, _, _) => {
                debug!("Ignoring unsupported axis: {:?}", axis);
                None
            }
            EventType::ButtonPressed(button, _) => {
                map_button(button).map(|button_type| RawControllerEvent::ButtonPressed {
                    button_type,
                    timestamp: now,
                })
            }
            EventType::Disconnected => {
                warn!("Active gamepad disconnected");
                self.active_gamepad = None;
                self.last_left_stick_x = 0.0;
                self.last_left_stick_y = 0.0;
                Some(RawControllerEvent::GamepadDisconnected)
            }
            _ => None,
        }
    }
}

pub struct CollectorHandle {
    thread: std::thread::JoinHandle<()>,
}

impl CollectorHandle {
    /// Runs the collector on its own OS thread; gilrs is neither `Send` nor async.
    pub fn spawn(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<RawControllerEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self, InputError> {
        info!("Spawning Event Collector with settings: {:?}", settings);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("gamepad".to_string())
            .spawn(move || {
                let collector = match EventCollector::create(settings, event_sender) {
                    Ok(collector) => {
                        let _ = ready_tx.send(Ok(()));
                        collector
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                collector.initialize().run_collection_loop(&shutdown);
            })
            .map_err(|e| InputError::Initialization(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|e| InputError::Initialization(e.to_string()))??;

        info!("Event Collector successfully started");
        Ok(Self { thread })
    }

    /// Waits for the collector thread to notice shutdown and exit.
    pub async fn join(self) {
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => debug!("Event Collector thread joined"),
            Ok(Err(_)) => error!("Event Collector thread panicked"),
            Err(e) => error!("Failed to join Event Collector thread: {}", e),
        }
    }
}

fn map_button(button: Button) -> Option<ButtonType> {
    match button {
        Button::South => Some(ButtonType::A),
        Button::East => Some(ButtonType::B),
        Button::West => Some(ButtonType::Y),
        Button::North => Some(ButtonType::X),
        Button::Start => Some(ButtonType::Start),
        Button::Select => Some(ButtonType::Select),
        _ => None,
    }
}

// Values inside the deadzone snap to zero; the rest is rescaled to [0, 1].
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}
