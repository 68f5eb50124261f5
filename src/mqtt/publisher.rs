//! Command publisher
//!
//! Every outbound message goes through [`CommandPublisher`]. Before each send
//! it reads the current [`ConnectionState`] from a watch channel written only
//! by the MQTT handler. While the broker is unreachable a publish is dropped
//! and logged: a stale wheel command is worse than a lost one, so nothing is
//! queued or retried.

use crate::drive::emergency::EmergencyDirective;
use crate::drive::mixer::MotorCommand;
use crate::mqtt::config::Topics;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Transport rejected message: {0}")]
    Transport(String),

    #[error("Failed to serialize payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of a publish attempt
///
/// Neither variant is an error to the caller; dropping is the expected
/// behaviour while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Dropped,
}

/// Fire-and-forget message sink
///
/// Implementations must not block and must not retry.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

impl Transport for AsyncClient {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        // QoS 0, no retain: the broker default for the browser client
        self.try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[derive(Clone)]
pub struct CommandPublisher {
    transport: Arc<dyn Transport>,
    connection: watch::Receiver<ConnectionState>,
    topics: Topics,
}

impl fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPublisher")
            .field("connection", &*self.connection.borrow())
            .field("topics", &self.topics)
            .finish()
    }
}

impl CommandPublisher {
    pub fn new(
        transport: Arc<dyn Transport>,
        connection: watch::Receiver<ConnectionState>,
        topics: Topics,
    ) -> Self {
        Self {
            transport,
            connection,
            topics,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Sends `payload` to `topic` if the broker is reachable.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> PublishOutcome {
        let state = self.connection_state();
        if !state.is_connected() {
            warn!("Not connected ({}), dropping message for {}", state, topic);
            return PublishOutcome::Dropped;
        }

        match self.transport.send(topic, payload.into()) {
            Ok(()) => {
                debug!("Published to {}", topic);
                PublishOutcome::Sent
            }
            Err(e) => {
                warn!("Publish to {} failed, dropping: {}", topic, e);
                PublishOutcome::Dropped
            }
        }
    }

    /// Serializes `value` as JSON and publishes it.
    pub fn publish_structured<T: Serialize + ?Sized>(&self, topic: &str, value: &T) -> PublishOutcome {
        match serde_json::to_vec(value) {
            Ok(payload) => self.publish(topic, payload),
            Err(e) => {
                error!("{}", PublishError::from(e));
                PublishOutcome::Dropped
            }
        }
    }

    pub fn send_motor(&self, command: MotorCommand) -> PublishOutcome {
        debug!("Motor command {}", command);
        self.publish_structured(&self.topics.motor, &command)
    }

    pub fn send_emergency(&self, directive: EmergencyDirective) -> PublishOutcome {
        self.publish(&self.topics.emergency, directive.as_payload())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records every message handed to the transport.
    #[derive(Default)]
    pub struct RecordingTransport {
        sent: Mutex<Vec<(String, String)>>,
        reject: Mutex<bool>,
    }

    impl RecordingTransport {
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_on(&self, topic: &str) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| payload)
                .collect()
        }

        pub fn motor_commands(&self, topics: &Topics) -> Vec<MotorCommand> {
            self.sent_on(&topics.motor)
                .iter()
                .map(|payload| serde_json::from_str(payload).unwrap())
                .collect()
        }

        pub fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        pub fn set_reject(&self, reject: bool) {
            *self.reject.lock().unwrap() = reject;
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            if *self.reject.lock().unwrap() {
                return Err(PublishError::Transport("request queue full".to_string()));
            }
            let payload = String::from_utf8(payload).unwrap();
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    /// A publisher wired to a recording transport, plus the connection switch.
    pub fn recording_publisher(
        state: ConnectionState,
    ) -> (
        CommandPublisher,
        Arc<RecordingTransport>,
        watch::Sender<ConnectionState>,
    ) {
        let transport = Arc::new(RecordingTransport::default());
        let (connection_tx, connection_rx) = watch::channel(state);
        let publisher = CommandPublisher::new(
            transport.clone(),
            connection_rx,
            Topics::with_prefix("wheelchair"),
        );
        (publisher, transport, connection_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::recording_publisher;
    use super::*;

    #[test]
    fn drops_everything_while_offline() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Failed,
        ] {
            let (publisher, transport, _tx) = recording_publisher(state);
            assert_eq!(
                publisher.send_motor(MotorCommand::new(10, 10)),
                PublishOutcome::Dropped
            );
            assert_eq!(
                publisher.send_emergency(EmergencyDirective::Stop),
                PublishOutcome::Dropped
            );
            assert_eq!(transport.count(), 0);
        }
    }

    #[test]
    fn motor_commands_are_json() {
        let (publisher, transport, _tx) = recording_publisher(ConnectionState::Connected);
        assert_eq!(
            publisher.send_motor(MotorCommand::new(30, -30)),
            PublishOutcome::Sent
        );
        assert_eq!(
            transport.sent(),
            vec![(
                "wheelchair/command/motor".to_string(),
                r#"{"left":30,"right":-30}"#.to_string()
            )]
        );
    }

    #[test]
    fn connection_changes_apply_to_the_next_publish() {
        let (publisher, transport, connection_tx) =
            recording_publisher(ConnectionState::Connected);

        publisher.publish("wheelchair/command/emergency", "STOP");
        connection_tx.send_replace(ConnectionState::Disconnected);
        publisher.publish("wheelchair/command/emergency", "STOP");
        connection_tx.send_replace(ConnectionState::Connected);
        publisher.publish("wheelchair/command/emergency", "START");

        assert_eq!(
            transport.sent_on("wheelchair/command/emergency"),
            vec!["STOP".to_string(), "START".to_string()]
        );
    }

    #[test]
    fn transport_failure_is_absorbed() {
        let (publisher, transport, _tx) = recording_publisher(ConnectionState::Connected);
        transport.set_reject(true);
        assert_eq!(
            publisher.send_motor(MotorCommand::STOP),
            PublishOutcome::Dropped
        );

        transport.set_reject(false);
        assert_eq!(publisher.send_motor(MotorCommand::STOP), PublishOutcome::Sent);
        assert_eq!(transport.count(), 1);
    }
}
