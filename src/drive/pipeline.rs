//! Drive pipeline task
//!
//! Owns the sampling loop and the test emitter and serializes every request
//! that touches them: input session events from the gamepad, test emitter
//! toggles and manual single-shot commands from the console. Requests are
//! handled one at a time on a single task; the periodic ticks run on their
//! own timers.
//!
//! Emergency directives do not come through here, see [`crate::drive::emergency`].

use crate::drive::mixer::MotorCommand;
use crate::drive::sampling::{InputEvent, SamplingLoop, SessionState};
use crate::drive::settings::SettingsReceiver;
use crate::drive::test_emitter::{PeriodicTestEmitter, TestEmitterState};
use crate::mqtt::publisher::CommandPublisher;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const REQUEST_CAPACITY: usize = 100;

#[derive(Debug)]
pub enum DriveRequest {
    Input(InputEvent),
    ToggleTestEmitter,
    Manual(MotorCommand),
    Status {
        response_tx: oneshot::Sender<PipelineStatus>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStatus {
    pub session: SessionState,
    pub test_emitter: TestEmitterState,
}

pub struct DrivePipeline {
    publisher: CommandPublisher,
    sampling: SamplingLoop,
    test_emitter: PeriodicTestEmitter,
}

impl DrivePipeline {
    pub fn new(publisher: CommandPublisher, settings: SettingsReceiver) -> Self {
        Self {
            sampling: SamplingLoop::new(publisher.clone(), settings.clone()),
            test_emitter: PeriodicTestEmitter::new(publisher.clone(), settings),
            publisher,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            session: self.sampling.state(),
            test_emitter: self.test_emitter.state(),
        }
    }

    pub fn handle(&mut self, request: DriveRequest) {
        match request {
            DriveRequest::Input(event) => self.sampling.handle(event),
            DriveRequest::ToggleTestEmitter => {
                let state = self.test_emitter.toggle();
                debug!("Test emitter toggled to {:?}", state);
            }
            DriveRequest::Manual(command) => {
                info!("Manual command {}", command);
                self.publisher.send_motor(command);
            }
            DriveRequest::Status { response_tx } => {
                if response_tx.send(self.status()).is_err() {
                    warn!("Status requester went away");
                }
            }
        }
    }

    /// Ends a live session (sending its stop command) and silences the emitter.
    pub fn shut_down(&mut self) {
        if self.sampling.state() == SessionState::Active {
            self.sampling.session_end();
        }
        self.test_emitter.stop();
    }

    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<DriveRequest>,
        shutdown: CancellationToken,
    ) {
        info!("Drive pipeline running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Drive pipeline shutting down");
                    break;
                }
                request = requests.recv() => match request {
                    Some(request) => self.handle(request),
                    None => {
                        warn!("All drive request senders dropped");
                        break;
                    }
                },
            }
        }
        self.shut_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::mixer::InputVector;
    use crate::drive::settings::DriveSettings;
    use crate::mqtt::config::Topics;
    use crate::mqtt::publisher::testing::recording_publisher;
    use crate::mqtt::publisher::ConnectionState;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn shutdown_halts_a_live_session() {
        let (publisher, transport, _tx) = recording_publisher(ConnectionState::Connected);
        let (_settings_tx, settings_rx) = watch::channel(DriveSettings::default());
        let pipeline = DrivePipeline::new(publisher, settings_rx);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CAPACITY);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(pipeline.run(request_rx, shutdown.clone()));

        request_tx
            .send(DriveRequest::Input(InputEvent::Start(InputVector::new(
                0.0, 1.0, 1.0,
            ))))
            .await
            .unwrap();
        request_tx.send(DriveRequest::ToggleTestEmitter).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let (response_tx, response_rx) = oneshot::channel();
        request_tx
            .send(DriveRequest::Status { response_tx })
            .await
            .unwrap();
        let status = response_rx.await.unwrap();
        assert_eq!(status.session, SessionState::Active);
        assert!(matches!(status.test_emitter, TestEmitterState::Running(_)));

        shutdown.cancel();
        task.await.unwrap();
        let count = transport.count();
        sleep(Duration::from_millis(500)).await;

        let commands = transport.motor_commands(&Topics::default());
        assert_eq!(transport.count(), count);
        assert_eq!(commands.last(), Some(&MotorCommand::STOP));
    }

    #[tokio::test]
    async fn manual_command_is_sent_once() {
        let (publisher, transport, _tx) = recording_publisher(ConnectionState::Connected);
        let (_settings_tx, settings_rx) = watch::channel(DriveSettings::default());
        let mut pipeline = DrivePipeline::new(publisher, settings_rx);

        pipeline.handle(DriveRequest::Manual(MotorCommand::new(40, -40)));

        assert_eq!(
            transport.motor_commands(&Topics::default()),
            vec![MotorCommand::new(40, -40)]
        );
        assert_eq!(pipeline.status().session, SessionState::Idle);
    }
}
