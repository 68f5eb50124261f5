//! Controller Handle - lifecycle of the gamepad input source
//!
//! Wires the collector thread to the processor task. All output goes to the
//! drive pipeline and the emergency override; the handle is only kept to
//! wait for both halves at shutdown.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event_collector::{CollectorHandle, CollectorSettings};
use super::event_processor::EventProcessor;
use crate::drive::emergency::EmergencyOverride;
use crate::drive::pipeline::DriveRequest;

const EVENT_CAPACITY: usize = 1000;

/// `[input]` section of the configuration file
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct InputSettings {
    /// Set to false to run without a gamepad
    pub gamepad: bool,

    /// Analog stick deadzone as a fraction (0.0-1.0)
    ///
    /// Prevents stick drift from holding a session open.
    pub joystick_deadzone: f32,

    /// Stick deflection (after the deadzone) that starts a drive session
    pub activation_threshold: f32,

    /// Pause between gilrs polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            gamepad: true,
            joystick_deadzone: 0.05,
            activation_threshold: 0.1,
            poll_interval_ms: 2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Failed to initialize gamepad input: {0}")]
    Initialization(String),

    #[error("Failed to send gamepad event: {0}")]
    EventSend(String),
}

pub struct ControllerHandle {
    collector: CollectorHandle,
    processor: JoinHandle<()>,
}

impl ControllerHandle {
    pub fn spawn(
        settings: &InputSettings,
        drive_tx: mpsc::Sender<DriveRequest>,
        emergency: EmergencyOverride,
        shutdown: CancellationToken,
    ) -> Result<Self, InputError> {
        info!("Initializing gamepad input with settings: {:?}", settings);

        let collector_settings = CollectorSettings {
            joystick_deadzone: settings.joystick_deadzone.clamp(0.0, 0.95),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
        };

        let (event_sender, event_receiver) = mpsc::channel(EVENT_CAPACITY);
        debug!("Created event channel with buffer capacity {}", EVENT_CAPACITY);

        let collector = CollectorHandle::spawn(collector_settings, event_sender, shutdown.clone())?;

        let processor = EventProcessor::new(settings.activation_threshold, drive_tx, emergency);
        let processor = tokio::spawn(processor.run(event_receiver, shutdown));

        info!("Gamepad input initialized successfully");
        Ok(Self {
            collector,
            processor,
        })
    }

    /// Waits for the processor to flush its final session end, then for the collector.
    pub async fn join(self) {
        if let Err(e) = self.processor.await {
            warn!("Event Processor task failed: {}", e);
        }
        self.collector.join().await;
    }
}
