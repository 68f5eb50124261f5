//! Periodic test emitter
//!
//! Bench-testing aid: while running, it publishes the operator's raw
//! `test_left` / `test_right` values at a fixed interval. The values skip the
//! mixer entirely. Stopping it sends nothing; unlike an input session this is
//! not live control.

use crate::drive::settings::SettingsReceiver;
use crate::drive::ticker::PeriodicTask;
use crate::mqtt::publisher::CommandPublisher;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestEmitterState {
    Stopped,
    Running(Duration),
}

pub struct PeriodicTestEmitter {
    publisher: CommandPublisher,
    settings: SettingsReceiver,
    task: Option<PeriodicTask>,
}

impl PeriodicTestEmitter {
    pub fn new(publisher: CommandPublisher, settings: SettingsReceiver) -> Self {
        Self {
            publisher,
            settings,
            task: None,
        }
    }

    pub fn state(&self) -> TestEmitterState {
        match &self.task {
            Some(task) => TestEmitterState::Running(task.period()),
            None => TestEmitterState::Stopped,
        }
    }

    pub fn toggle(&mut self) -> TestEmitterState {
        match self.state() {
            TestEmitterState::Stopped => self.start(),
            TestEmitterState::Running(_) => self.stop(),
        }
        self.state()
    }

    /// Starts emitting; the interval is read now, the wheel values on every tick.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }

        let period = self.settings.borrow().test_interval();
        let publisher = self.publisher.clone();
        let settings = self.settings.clone();
        self.task = Some(PeriodicTask::spawn("test-emitter", period, move || {
            let command = settings.borrow().test_command();
            publisher.send_motor(command);
        }));
        info!("Periodic test emitter started ({:?})", period);
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
            info!("Periodic test emitter stopped");
        }
    }
}
