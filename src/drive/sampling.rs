//! Sampling loop controller
//!
//! Input devices report at their own rate, anywhere from a handful to
//! hundreds of events per second. The loop decouples that rate from the
//! publish cadence: input events only overwrite a single-slot mailbox, and a
//! fixed-interval tick reads the slot, mixes and publishes.
//!
//! ```text
//!            session_start(v)                 session_end()
//!   Idle ─────────────────────────► Active ─────────────────────► Idle
//!                                   │  ▲                           │
//!                session_update(v)  └──┘                           └─► {left:0, right:0}
//! ```
//!
//! Ending a session always publishes one explicit stop command, whatever the
//! last sample was. This is how a released stick or a vanished gamepad halts
//! the platform.

use crate::drive::mixer::{mix, InputVector, MotorCommand};
use crate::drive::settings::SettingsReceiver;
use crate::drive::ticker::PeriodicTask;
use crate::mqtt::publisher::{CommandPublisher, PublishOutcome};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Input session boundary events, as delivered by an input source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Start(InputVector),
    Move(InputVector),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
}

type SampleSlot = Arc<Mutex<Option<InputVector>>>;

pub struct SamplingLoop {
    publisher: CommandPublisher,
    settings: SettingsReceiver,
    latest: SampleSlot,
    ticker: Option<PeriodicTask>,
}

impl SamplingLoop {
    pub fn new(publisher: CommandPublisher, settings: SettingsReceiver) -> Self {
        Self {
            publisher,
            settings,
            latest: Arc::new(Mutex::new(None)),
            ticker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.ticker.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::Start(vector) => self.session_start(vector),
            InputEvent::Move(vector) => self.session_update(vector),
            InputEvent::End => {
                self.session_end();
            }
        }
    }

    /// Stores the first sample and starts ticking.
    ///
    /// A start while already active restarts the session; the old ticker is
    /// stopped before the new one exists.
    pub fn session_start(&mut self, initial: InputVector) {
        if let Some(previous) = self.ticker.take() {
            info!("Session restarted while active, replacing sampling ticker");
            previous.stop();
        }

        store(&self.latest, Some(initial));

        let period = self.settings.borrow().sample_interval();
        let latest = self.latest.clone();
        let publisher = self.publisher.clone();
        let settings = self.settings.clone();
        self.ticker = Some(PeriodicTask::spawn("sampling", period, move || {
            publish_latest(&latest, &publisher, &settings)
        }));

        info!("Input session started, sampling every {:?}", period);
    }

    /// Replaces the stored sample. Never publishes by itself.
    pub fn session_update(&self, vector: InputVector) {
        if self.ticker.is_none() {
            debug!("Ignoring input update outside of a session");
            return;
        }
        store(&self.latest, Some(vector));
    }

    /// Stops ticking, forgets the sample and publishes a stop command.
    pub fn session_end(&mut self) -> PublishOutcome {
        match self.ticker.take() {
            Some(ticker) => {
                ticker.stop();
                info!("Input session ended, sending stop command");
            }
            None => debug!("Session end without active session, sending stop command anyway"),
        }
        store(&self.latest, None);

        self.publisher.send_motor(MotorCommand::STOP)
    }
}

fn store(slot: &SampleSlot, sample: Option<InputVector>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = sample;
}

// One tick: read the newest sample, mix with the current speed range, publish.
fn publish_latest(latest: &SampleSlot, publisher: &CommandPublisher, settings: &SettingsReceiver) {
    let sample = *latest.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(vector) = sample else {
        debug!("Sampling tick without a stored sample");
        return;
    };

    let range = settings.borrow().speed_range();
    publisher.send_motor(mix(&vector, range));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::settings::DriveSettings;
    use crate::mqtt::publisher::testing::{recording_publisher, RecordingTransport};
    use crate::mqtt::publisher::ConnectionState;
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::sleep;

    struct Rig {
        sampling: SamplingLoop,
        transport: Arc<RecordingTransport>,
        connection: watch::Sender<ConnectionState>,
        settings: watch::Sender<DriveSettings>,
    }

    impl Rig {
        fn new() -> Self {
            let (publisher, transport, connection) =
                recording_publisher(ConnectionState::Connected);
            let (settings, settings_rx) = watch::channel(DriveSettings::default());
            Self {
                sampling: SamplingLoop::new(publisher, settings_rx),
                transport,
                connection,
                settings,
            }
        }

        fn commands(&self) -> Vec<MotorCommand> {
            self.transport
                .motor_commands(&crate::mqtt::config::Topics::default())
        }
    }

    fn forward() -> InputVector {
        InputVector::new(0.0, 1.0, 1.0)
    }

    #[tokio::test(start_paused = true)]
    async fn session_ends_with_exactly_one_stop() {
        let mut rig = Rig::new();
        let v1 = InputVector::new(0.5, 0.5, 1.0);
        let v2 = InputVector::new(-0.5, 0.5, 1.0);

        rig.sampling.session_start(forward());
        sleep(Duration::from_millis(65)).await;
        rig.sampling.session_update(v1);
        sleep(Duration::from_millis(30)).await;
        rig.sampling.session_update(v2);
        sleep(Duration::from_millis(30)).await;

        let before_end = rig.commands().len();
        assert_eq!(rig.sampling.session_end(), PublishOutcome::Sent);
        assert_eq!(rig.sampling.state(), SessionState::Idle);

        sleep(Duration::from_millis(200)).await;

        let commands = rig.commands();
        assert_eq!(commands.len(), before_end + 1);
        assert_eq!(commands.last(), Some(&MotorCommand::STOP));
        assert_eq!(
            &commands[..before_end],
            &[
                MotorCommand::new(50, 50),
                MotorCommand::new(50, 50),
                MotorCommand::new(0, 50),
                MotorCommand::new(50, 0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn updates_alone_never_publish() {
        let mut rig = Rig::new();
        rig.sampling.session_start(forward());
        for i in 0..100 {
            rig.sampling
                .session_update(InputVector::new(0.0, i as f32 / 100.0, 1.0));
        }
        rig.sampling.session_update(InputVector::new(0.5, 0.5, 1.0));
        sleep(Duration::from_millis(29)).await;
        assert!(rig.commands().is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(rig.commands(), vec![MotorCommand::new(0, 50)]);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_uses_latest_sample_only() {
        let mut rig = Rig::new();
        rig.sampling.session_start(forward());
        rig.sampling.session_update(InputVector::new(0.0, -1.0, 1.0));
        rig.sampling.session_update(InputVector::new(0.0, 0.5, 1.0));

        sleep(Duration::from_millis(31)).await;
        assert_eq!(rig.commands(), vec![MotorCommand::new(25, 25)]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_ticker() {
        let mut rig = Rig::new();
        rig.sampling.session_start(forward());
        rig.sampling.session_start(InputVector::new(0.0, -1.0, 1.0));

        sleep(Duration::from_millis(95)).await;
        assert_eq!(
            rig.commands(),
            vec![MotorCommand::new(-50, -50); 3],
            "a second ticker would double the publish count"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_published_while_disconnected() {
        let mut rig = Rig::new();
        rig.sampling.session_start(forward());
        sleep(Duration::from_millis(65)).await;
        assert_eq!(rig.transport.count(), 2);

        rig.connection.send_replace(ConnectionState::Disconnected);
        sleep(Duration::from_millis(120)).await;
        assert_eq!(rig.transport.count(), 2);

        assert_eq!(rig.sampling.session_end(), PublishOutcome::Dropped);
        assert_eq!(rig.transport.count(), 2);

        rig.connection.send_replace(ConnectionState::Connected);
        sleep(Duration::from_millis(120)).await;
        assert_eq!(rig.transport.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_range_is_read_on_every_tick() {
        let mut rig = Rig::new();
        rig.sampling.session_start(forward());
        sleep(Duration::from_millis(31)).await;

        rig.settings.send_modify(|s| {
            s.min_speed = 10;
            s.max_speed = 60;
        });
        sleep(Duration::from_millis(30)).await;

        assert_eq!(
            rig.commands(),
            vec![MotorCommand::new(50, 50), MotorCommand::new(35, 35)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn update_outside_session_is_ignored() {
        let mut rig = Rig::new();
        rig.sampling.session_update(forward());
        sleep(Duration::from_millis(100)).await;
        assert!(rig.commands().is_empty());
        assert_eq!(rig.sampling.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn end_while_idle_still_sends_stop() {
        let mut rig = Rig::new();
        rig.sampling.handle(InputEvent::End);
        assert_eq!(rig.commands(), vec![MotorCommand::STOP]);
    }

    #[tokio::test(start_paused = true)]
    async fn events_drive_the_state_machine() {
        let mut rig = Rig::new();
        rig.sampling.handle(InputEvent::Start(forward()));
        assert_eq!(rig.sampling.state(), SessionState::Active);
        rig.sampling.handle(InputEvent::Move(InputVector::new(0.0, 0.0, 0.0)));
        sleep(Duration::from_millis(31)).await;
        rig.sampling.handle(InputEvent::End);

        assert_eq!(rig.sampling.state(), SessionState::Idle);
        assert_eq!(
            rig.commands(),
            vec![MotorCommand::STOP, MotorCommand::STOP]
        );
    }
}
