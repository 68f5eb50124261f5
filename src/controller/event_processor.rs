use crate::controller::event_collector::{ButtonType, RawControllerEvent};
use crate::drive::emergency::EmergencyOverride;
use crate::drive::mixer::InputVector;
use crate::drive::pipeline::DriveRequest;
use crate::drive::sampling::InputEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Full stick deflection, the input source's `maxDistance`
const FULL_DEFLECTION: f32 = 1.0;

/// Turns stick positions into input session boundaries.
///
/// The stick leaving the centre starts a session, every further position is
/// a move, and coming back below the threshold ends it.
#[derive(Debug, Clone)]
pub struct StickSession {
    activation_threshold: f32,
    active: bool,
}

impl StickSession {
    pub fn new(activation_threshold: f32) -> Self {
        Self {
            activation_threshold: activation_threshold.clamp(0.0, FULL_DEFLECTION),
            active: false,
        }
    }

    pub fn observe(&mut self, x: f32, y: f32) -> Option<InputEvent> {
        let distance = x.hypot(y);
        let engaged = distance > 0.0 && distance >= self.activation_threshold;

        match (self.active, engaged) {
            (false, false) => None,
            (false, true) => {
                self.active = true;
                Some(InputEvent::Start(stick_vector(x, y, distance)))
            }
            (true, true) => Some(InputEvent::Move(stick_vector(x, y, distance))),
            (true, false) => {
                self.active = false;
                Some(InputEvent::End)
            }
        }
    }

    /// Ends a live session when the gamepad goes away.
    pub fn release(&mut self) -> Option<InputEvent> {
        if self.active {
            self.active = false;
            Some(InputEvent::End)
        } else {
            None
        }
    }
}

// Direction is the unit vector of the deflection, magnitude the deflection itself.
fn stick_vector(x: f32, y: f32, distance: f32) -> InputVector {
    InputVector::from_distance(x / distance, y / distance, distance, FULL_DEFLECTION)
}

pub struct EventProcessor {
    session: StickSession,
    drive_tx: mpsc::Sender<DriveRequest>,
    emergency: EmergencyOverride,
}

impl EventProcessor {
    pub fn new(
        activation_threshold: f32,
        drive_tx: mpsc::Sender<DriveRequest>,
        emergency: EmergencyOverride,
    ) -> Self {
        Self {
            session: StickSession::new(activation_threshold),
            drive_tx,
            emergency,
        }
    }

    pub async fn process(&mut self, event: RawControllerEvent) {
        match event {
            RawControllerEvent::LeftStick { x, y, .. } => {
                if let Some(input) = self.session.observe(x, y) {
                    self.forward_input(input).await;
                }
            }
            RawControllerEvent::ButtonPressed { button_type, .. } => {
                self.on_button(button_type).await
            }
            RawControllerEvent::GamepadConnected { name } => {
                info!("Gamepad {} ready", name);
            }
            RawControllerEvent::GamepadDisconnected => {
                if let Some(input) = self.session.release() {
                    warn!("Gamepad lost during a session, ending it");
                    self.forward_input(input).await;
                }
            }
        }
    }

    async fn on_button(&mut self, button: ButtonType) {
        match button {
            ButtonType::B => {
                self.emergency.stop();
            }
            ButtonType::Start => {
                self.emergency.start();
            }
            ButtonType::X => self.send(DriveRequest::ToggleTestEmitter).await,
            other => debug!("No action bound to {:?}", other),
        }
    }

    // Moves are lossy, only the newest sample matters. Boundaries are not.
    async fn forward_input(&self, input: InputEvent) {
        match input {
            InputEvent::Move(_) => match self.drive_tx.try_send(DriveRequest::Input(input)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("Drive queue full, skipping stick move"),
                Err(TrySendError::Closed(_)) => warn!("Drive pipeline gone, dropping stick move"),
            },
            _ => self.send(DriveRequest::Input(input)).await,
        }
    }

    async fn send(&self, request: DriveRequest) {
        if let Err(e) = self.drive_tx.send(request).await {
            warn!("Drive pipeline gone, dropping {:?}", e.0);
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RawControllerEvent>,
        shutdown: CancellationToken,
    ) {
        info!("Event Processor running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.process(event).await,
                    None => {
                        warn!("Gamepad event channel closed");
                        break;
                    }
                },
            }
        }
        if let Some(input) = self.session.release() {
            self.forward_input(input).await;
        }
        info!("Event Processor finished");
    }
}
