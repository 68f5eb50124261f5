use crate::mqtt::config::{BrokerConfig, Topics};
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::publisher::ConnectionState;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport,
};
use statum::{machine, state};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CLIENT_CAPACITY: usize = 100;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Broker host must not be empty")]
    MissingHost,

    #[error("Failed to read CA file {path}: {source}")]
    CaFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured,
    Online(AsyncClient),
}

/// Owns the broker connection and is the only writer of [`ConnectionState`].
#[machine]
#[derive(Debug)]
pub struct MqttHandler<S: LinkState> {
    options: MqttOptions,
    topics: Topics,
    connection_tx: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
    messages_received: u64,
}

impl<S: LinkState> MqttHandler<S> {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.connection_tx.send_replace(state);
        if previous != state {
            info!("MQTT connection: {} -> {}", previous, state);
        }
    }

    fn current_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }
}

impl MqttHandler<Configured> {
    pub fn create(
        config: &BrokerConfig,
        connection_tx: watch::Sender<ConnectionState>,
    ) -> Result<Self, LinkError> {
        if config.host.trim().is_empty() {
            return Err(LinkError::MissingHost);
        }

        let client_id = config.client_id();
        debug!("Creating MQTT options for {} as {}", config, client_id);
        let mut options = MqttOptions::new(client_id, config.host.trim(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(1)));
        if config.has_credentials() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        if let Some(path) = &config.ca_file {
            let ca = std::fs::read(path).map_err(|source| LinkError::CaFile {
                path: path.clone(),
                source,
            })?;
            info!("Using TLS with CA file {}", path.display());
            options.set_transport(Transport::tls(ca, None, None));
        }

        Ok(Self::new(
            options,
            config.topics(),
            connection_tx,
            Duration::from_millis(config.reconnect_delay_ms),
            0,
        ))
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    /// Creates the client. Nothing goes over the wire until the event loop is polled.
    pub fn connect(self) -> (MqttHandler<Online>, AsyncClient, EventLoop) {
        let (client, eventloop) = AsyncClient::new(self.options.clone(), CLIENT_CAPACITY);
        self.set_state(ConnectionState::Connecting);
        info!("Connecting to broker {:?}", self.options.broker_address());
        let handler = self.transition_with(client.clone());
        (handler, client, eventloop)
    }
}

impl MqttHandler<Online> {
    fn client(&self) -> Option<&AsyncClient> {
        self.get_state_data()
    }

    /// Drives the event loop until `shutdown` fires.
    ///
    /// Reconnection is left to the event loop: after an error the next poll
    /// dials again, after `reconnect_delay`.
    pub async fn run(
        mut self,
        mut eventloop: EventLoop,
        inbound: mpsc::Sender<InboundMessage>,
        shutdown: CancellationToken,
    ) {
        info!("MQTT event loop running");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                polled = eventloop.poll() => match polled {
                    Ok(event) => self.on_event(event, &inbound),
                    Err(ConnectionError::RequestsDone) => {
                        info!("All MQTT clients dropped, stopping event loop");
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    Err(e) => {
                        let next = state_after_error(self.current_state());
                        warn!("MQTT connection error: {}", e);
                        self.set_state(next);

                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(self.reconnect_delay) => {
                                debug!("Retrying broker connection");
                                self.set_state(ConnectionState::Connecting);
                            }
                        }
                    }
                },
            }
        }

        self.disconnect(&mut eventloop).await;
        info!(
            "MQTT event loop finished after {} inbound messages",
            self.messages_received
        );
    }

    fn on_event(&mut self, event: Event, inbound: &mpsc::Sender<InboundMessage>) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    error!("Broker refused connection: {:?}", ack.code);
                    self.set_state(ConnectionState::Failed);
                    return;
                }
                self.set_state(ConnectionState::Connected);
                self.subscribe_state();
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription acknowledged: {:?}", ack.return_codes);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.messages_received += 1;
                let message =
                    InboundMessage::from_topic(publish.topic.clone(), publish.payload.to_vec());
                debug!("Received: {}", message);
                if let Err(e) = inbound.try_send(message) {
                    warn!("Dropping inbound message: {}", e);
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker sent disconnect");
                self.set_state(ConnectionState::Disconnected);
            }
            Event::Incoming(_) | Event::Outgoing(_) => {}
        }
    }

    // Called on every ConnAck; clean sessions forget subscriptions.
    fn subscribe_state(&self) {
        let Some(client) = self.client() else {
            return;
        };
        match client.try_subscribe(&self.topics.state, QoS::AtLeastOnce) {
            Ok(()) => info!("Subscribed to {}", self.topics.state),
            Err(e) => error!("Failed to subscribe to {}: {}", self.topics.state, e),
        }
    }

    async fn disconnect(&self, eventloop: &mut EventLoop) {
        if self.current_state().is_connected() {
            if let Some(client) = self.client() {
                match client.try_disconnect() {
                    Ok(()) => {
                        let drained = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
                            loop {
                                match eventloop.poll().await {
                                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                                    Ok(_) => {}
                                }
                            }
                        })
                        .await;
                        if drained.is_err() {
                            warn!("Broker disconnect timed out");
                        }
                    }
                    Err(e) => warn!("Failed to request disconnect: {}", e),
                }
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }
}

/// A failed first attempt is `Failed`; losing a live link is `Disconnected`.
fn state_after_error(current: ConnectionState) -> ConnectionState {
    match current {
        ConnectionState::Connected | ConnectionState::Disconnected => {
            ConnectionState::Disconnected
        }
        ConnectionState::Connecting | ConnectionState::Failed => ConnectionState::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, Publish};

    fn broker(host: &str, port: u16) -> BrokerConfig {
        BrokerConfig {
            host: host.to_string(),
            port,
            reconnect_delay_ms: 20,
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn create_applies_broker_settings() {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        let config = BrokerConfig {
            username: "op".to_string(),
            password: "secret".to_string(),
            keep_alive_secs: 7,
            ..broker("broker.local", 8883)
        };
        let handler = MqttHandler::create(&config, tx).unwrap();
        let options = handler.options();

        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(7));
        assert!(options.client_id().starts_with("teleop-"));
        assert_eq!(
            options.credentials(),
            Some(("op".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn create_rejects_bad_config() {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        assert!(matches!(
            MqttHandler::create(&broker("  ", 1883), tx.clone()),
            Err(LinkError::MissingHost)
        ));

        let config = BrokerConfig {
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..broker("localhost", 8883)
        };
        assert!(matches!(
            MqttHandler::create(&config, tx),
            Err(LinkError::CaFile { .. })
        ));
    }

    #[test]
    fn error_state_depends_on_history() {
        assert_eq!(
            state_after_error(ConnectionState::Connected),
            ConnectionState::Disconnected
        );
        assert_eq!(
            state_after_error(ConnectionState::Connecting),
            ConnectionState::Failed
        );
        assert_eq!(
            state_after_error(ConnectionState::Failed),
            ConnectionState::Failed
        );
    }

    fn conn_ack(code: ConnectReturnCode) -> Event {
        Event::Incoming(Packet::ConnAck(ConnAck::new(code, false)))
    }

    #[test]
    fn conn_ack_success_connects_and_refusal_fails() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let handler = MqttHandler::create(&broker("127.0.0.1", 1), tx).unwrap();
        let (mut handler, _client, _eventloop) = handler.connect();
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);

        handler.on_event(conn_ack(ConnectReturnCode::Success), &inbound_tx);
        assert_eq!(*rx.borrow(), ConnectionState::Connected);

        handler.on_event(conn_ack(ConnectReturnCode::NotAuthorized), &inbound_tx);
        assert_eq!(*rx.borrow(), ConnectionState::Failed);
    }

    #[test]
    fn broker_disconnect_drops_a_live_link() {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let handler = MqttHandler::create(&broker("127.0.0.1", 1), tx).unwrap();
        let (mut handler, _client, _eventloop) = handler.connect();
        let (inbound_tx, _inbound_rx) = mpsc::channel(8);

        handler.on_event(conn_ack(ConnectReturnCode::Success), &inbound_tx);
        handler.on_event(Event::Incoming(Packet::Disconnect), &inbound_tx);
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }

    #[test]
    fn incoming_publish_is_forwarded() {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        let handler = MqttHandler::create(&broker("127.0.0.1", 1), tx).unwrap();
        let (mut handler, _client, _eventloop) = handler.connect();
        let (inbound_tx, mut inbound_rx) = mpsc::channel(8);

        let payload = br#"{"mode":"idle"}"#.to_vec();
        let publish = Publish::new("teleop/state", QoS::AtLeastOnce, payload.clone());
        handler.on_event(Event::Incoming(Packet::Publish(publish)), &inbound_tx);

        let message = inbound_rx.try_recv().unwrap();
        assert_eq!(message.topic, "teleop/state");
        assert_eq!(message.payload, payload);
        assert_eq!(handler.messages_received, 1);
    }

    #[tokio::test]
    async fn unreachable_broker_reports_failed_and_shuts_down() {
        let (tx, mut rx) = watch::channel(ConnectionState::Disconnected);
        let handler = MqttHandler::create(&broker("127.0.0.1", 1), tx).unwrap();
        let (handler, _client, eventloop) = handler.connect();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connecting);

        let (inbound_tx, _inbound_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(handler.run(eventloop, inbound_tx, shutdown.clone()));

        let failed = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| *s == ConnectionState::Failed),
        )
        .await
        .is_ok();
        assert!(failed);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Disconnected);
    }
}
