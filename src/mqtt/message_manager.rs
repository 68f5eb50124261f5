//! Inbound message routing and status display
//!
//! The platform reports its wheel speeds on the state topic. Reports are
//! parsed as a whole: a malformed message is logged and discarded, and the
//! previously displayed state stays untouched. There is no field-by-field
//! update that could leave half a report on screen.

use crate::mqtt::config::Topics;
use crate::mqtt::publisher::ConnectionState;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::fmt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PREVIEW_LEN: usize = 40;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Local>,
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let content = String::from_utf8_lossy(&self.payload);
        let preview: String = content.chars().take(PREVIEW_LEN).collect();
        write!(
            f,
            "{} {} - {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.topic,
            preview
        )
    }
}

/// Wheel speeds as reported by the platform
#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct PlatformState {
    pub left_speed: f64,
    pub right_speed: f64,
}

/// Last accepted state report and when it arrived
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateReport {
    pub state: PlatformState,
    pub received: DateTime<Local>,
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "left {} / right {} (at {})",
            self.state.left_speed,
            self.state.right_speed,
            self.received.format("%H:%M:%S")
        )
    }
}

pub fn parse_state(payload: &[u8]) -> Result<PlatformState, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Routes inbound messages by topic and keeps the displayed platform state.
pub struct MsgManager {
    topics: Topics,
    received_msg: mpsc::Receiver<InboundMessage>,
    state_tx: watch::Sender<Option<StateReport>>,
}

impl MsgManager {
    pub fn new(
        topics: Topics,
        received_msg: mpsc::Receiver<InboundMessage>,
    ) -> (Self, watch::Receiver<Option<StateReport>>) {
        let (state_tx, state_rx) = watch::channel(None);
        (
            Self {
                topics,
                received_msg,
                state_tx,
            },
            state_rx,
        )
    }

    pub fn route(&self, message: InboundMessage) {
        if message.topic != self.topics.state {
            warn!("Received data on unexpected topic: {}", message);
            return;
        }

        match parse_state(&message.payload) {
            Ok(state) => {
                debug!("State report: {:?}", state);
                self.state_tx.send_replace(Some(StateReport {
                    state,
                    received: message.timestamp,
                }));
            }
            Err(e) => warn!("Invalid JSON in state message ({}): {}", e, message),
        }
    }

    pub async fn run(mut self) {
        while let Some(message) = self.received_msg.recv().await {
            self.route(message);
        }
        debug!("Inbound message channel closed");
    }
}

/// Logs connection changes and platform state reports as they happen.
pub async fn run_status_display(
    mut connection: watch::Receiver<ConnectionState>,
    mut reports: watch::Receiver<Option<StateReport>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = connection.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *connection.borrow_and_update();
                match state {
                    ConnectionState::Connected => info!("Status: {}", state),
                    _ => warn!("Status: {}", state),
                }
            }
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(report) = *reports.borrow_and_update() {
                    info!("Platform: {}", report);
                }
            }
        }
    }
    debug!("Status display finished");
}
