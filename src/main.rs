pub mod config;
pub mod console;
pub mod controller;
pub mod drive;
pub mod mqtt;

use crate::config::TeleopConfig;
use crate::console::Console;
use crate::controller::ControllerHandle;
use crate::drive::emergency::EmergencyOverride;
use crate::drive::pipeline::{DrivePipeline, REQUEST_CAPACITY};
use crate::mqtt::message_manager::{run_status_display, MsgManager};
use crate::mqtt::mqtt_handler::MqttHandler;
use crate::mqtt::publisher::{CommandPublisher, ConnectionState};
use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const INBOUND_CAPACITY: usize = 100;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_env()?;

    let config_path = config::config_path();
    let config = TeleopConfig::load_or_create(&config_path)
        .await
        .map_err(|e| eyre!("Failed to load configuration: {}", e))?;
    setup_logging(config.log_level());
    info!("Configuration: {}", config_path.display());
    info!("Broker: {}", config.broker);

    let shutdown = CancellationToken::new();
    let link_shutdown = CancellationToken::new();

    // Broker link, sole writer of the connection state
    let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
    let handler = MqttHandler::create(&config.broker, connection_tx)
        .map_err(|e| eyre!("Invalid broker configuration: {}", e))?;
    let (handler, client, eventloop) = handler.connect();
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let link = tokio::spawn(handler.run(eventloop, inbound_tx, link_shutdown.clone()));

    let topics = config.broker.topics();
    let (msg_manager, report_rx) = MsgManager::new(topics.clone(), inbound_rx);
    tokio::spawn(msg_manager.run());
    tokio::spawn(run_status_display(
        connection_rx.clone(),
        report_rx.clone(),
        shutdown.clone(),
    ));

    // Drive pipeline
    let publisher = CommandPublisher::new(Arc::new(client), connection_rx.clone(), topics);
    let emergency = EmergencyOverride::new(publisher.clone());
    let (settings_tx, settings_rx) = watch::channel(config.drive.clone());
    let (drive_tx, drive_rx) = mpsc::channel(REQUEST_CAPACITY);
    let pipeline = tokio::spawn(
        DrivePipeline::new(publisher, settings_rx).run(drive_rx, shutdown.clone()),
    );

    let controller = if config.input.gamepad {
        match ControllerHandle::spawn(
            &config.input,
            drive_tx.clone(),
            emergency.clone(),
            shutdown.clone(),
        ) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Continuing without gamepad: {}", e);
                None
            }
        }
    } else {
        info!("Gamepad input disabled");
        None
    };

    let console = Console::new(drive_tx, emergency, settings_tx, connection_rx, report_rx);
    let stdin = BufReader::new(tokio::io::stdin());
    tokio::spawn(console.run(stdin, shutdown.clone()));

    tokio::select! {
        _ = shutdown.cancelled() => {}
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Ctrl-C received"),
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
        }
    }

    info!("Shutting down");
    shutdown.cancel();

    // Final stop command goes out before the link is closed
    if let Some(controller) = controller {
        controller.join().await;
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, pipeline).await.is_err() {
        warn!("Drive pipeline did not finish in time");
    }
    link_shutdown.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, link).await.is_err() {
        warn!("MQTT link did not close in time");
    }

    info!("Shutdown complete");
    Ok(())
}

fn setup_env() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
