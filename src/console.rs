//! Operator console
//!
//! Line-based commands read from stdin. Everything except the emergency
//! directives goes through the drive pipeline; `stop` and `start` publish
//! directly.

use crate::drive::emergency::{EmergencyDirective, EmergencyOverride};
use crate::drive::mixer::MotorCommand;
use crate::drive::pipeline::DriveRequest;
use crate::drive::settings::{parse_field, SettingField, SettingsSender, UnknownSetting};
use crate::mqtt::message_manager::StateReport;
use crate::mqtt::publisher::ConnectionState;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HELP: &str = "\
commands:
  send <left> <right>   publish one motor command
  test | periodic       toggle the periodic test emitter
  stop | start          emergency STOP / START
  set <field> <value>   change a drive setting (min, max, sample, interval, left, right)
  status                connection, platform state, pipeline and settings
  help                  this text
  quit                  stop the platform and exit";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("Unknown command '{0}', try 'help'")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error(transparent)]
    UnknownSetting(#[from] UnknownSetting),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Send(MotorCommand),
    ToggleTestEmitter,
    Emergency(EmergencyDirective),
    Set { field: SettingField, value: String },
    Status,
    Help,
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = ConsoleError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ConsoleError::UnknownCommand(String::new()));
        };
        let args: Vec<&str> = words.collect();

        match verb.to_ascii_lowercase().as_str() {
            "send" => match args.as_slice() {
                [left, right] => Ok(OperatorCommand::Send(MotorCommand::new(
                    parse_field("left", left, 0),
                    parse_field("right", right, 0),
                ))),
                _ => Err(ConsoleError::Usage("send <left> <right>")),
            },
            "test" | "periodic" => Ok(OperatorCommand::ToggleTestEmitter),
            "stop" => Ok(OperatorCommand::Emergency(EmergencyDirective::Stop)),
            "start" => Ok(OperatorCommand::Emergency(EmergencyDirective::Start)),
            "set" => match args.as_slice() {
                [field, value] => Ok(OperatorCommand::Set {
                    field: field.parse()?,
                    value: value.to_string(),
                }),
                _ => Err(ConsoleError::Usage("set <field> <value>")),
            },
            "status" => Ok(OperatorCommand::Status),
            "help" | "?" => Ok(OperatorCommand::Help),
            "quit" | "exit" => Ok(OperatorCommand::Quit),
            other => Err(ConsoleError::UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    drive_tx: mpsc::Sender<DriveRequest>,
    emergency: EmergencyOverride,
    settings: SettingsSender,
    connection: watch::Receiver<ConnectionState>,
    reports: watch::Receiver<Option<StateReport>>,
}

impl Console {
    pub fn new(
        drive_tx: mpsc::Sender<DriveRequest>,
        emergency: EmergencyOverride,
        settings: SettingsSender,
        connection: watch::Receiver<ConnectionState>,
        reports: watch::Receiver<Option<StateReport>>,
    ) -> Self {
        Self {
            drive_tx,
            emergency,
            settings,
            connection,
            reports,
        }
    }

    pub async fn execute(&self, command: OperatorCommand) -> Flow {
        debug!("Console command: {:?}", command);
        match command {
            OperatorCommand::Send(motor) => self.request(DriveRequest::Manual(motor)).await,
            OperatorCommand::ToggleTestEmitter => {
                self.request(DriveRequest::ToggleTestEmitter).await
            }
            OperatorCommand::Emergency(directive) => {
                self.emergency.trigger(directive);
            }
            OperatorCommand::Set { field, value } => {
                self.settings.send_modify(|settings| settings.apply(field, &value));
                info!("Setting {} updated", field);
            }
            OperatorCommand::Status => println!("{}", self.status_report().await),
            OperatorCommand::Help => println!("{}", HELP),
            OperatorCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    async fn request(&self, request: DriveRequest) {
        if self.drive_tx.send(request).await.is_err() {
            warn!("Drive pipeline is not running");
        }
    }

    pub async fn status_report(&self) -> String {
        let connection = *self.connection.borrow();
        let platform = match *self.reports.borrow() {
            Some(report) => report.to_string(),
            None => "no report yet".to_string(),
        };
        let settings = self.settings.borrow().clone();

        let (response_tx, response_rx) = oneshot::channel();
        self.request(DriveRequest::Status { response_tx }).await;
        let pipeline = match response_rx.await {
            Ok(status) => format!(
                "session {:?}, test emitter {:?}",
                status.session, status.test_emitter
            ),
            Err(_) => "unavailable".to_string(),
        };

        format!(
            "connection: {}\nplatform:   {}\npipeline:   {}\nsettings:   {:?}",
            connection, platform, pipeline, settings
        )
    }

    /// Reads commands until `quit`, end of input or `shutdown`.
    pub async fn run<R>(self, input: R, shutdown: CancellationToken)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        info!("Console ready, type 'help' for commands");

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console input closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<OperatorCommand>() {
                Ok(command) => {
                    if self.execute(command).await == Flow::Quit {
                        info!("Quit requested from console");
                        shutdown.cancel();
                        break;
                    }
                }
                Err(e) => println!("{}", e),
            }
        }
    }
}
