pub mod assistant;
pub mod audio;
pub mod camera;
pub mod config;
pub mod engine;
pub mod mqtt;
pub mod protocol;
pub mod ui;
pub mod ui_sync;

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::camera::mjpeg::MjpegReader;
use crate::camera::stream::HttpStreamProbe;
use crate::config::AppConfig;
use crate::engine::{Collaborators, RemoteControl, RemoteControlHandle, UserIntent};
use crate::mqtt::transport::MqttTransport;
use crate::ui::DoorbellUi;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let app_config = setup_config().await?;

    let collaborators = Collaborators {
        transport: Box::new(MqttTransport::new(app_config.broker.clone())),
        probe: Arc::new(HttpStreamProbe::new()?),
        recorder: audio::default_recorder(&app_config.audio),
        sink: audio::default_sink()?,
    };

    let RemoteControlHandle {
        intents,
        panel,
        alerts,
        task,
    } = RemoteControl::spawn(&app_config, collaborators);
    let shutdown = intents.clone();
    let frames = MjpegReader::new(tokio::runtime::Handle::current())?;

    info!("Starting UI");
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Doorbell Remote")
            .with_inner_size([640.0, 720.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Doorbell Remote",
        native_options,
        Box::new(|cc| Ok(Box::new(DoorbellUi::new(cc, intents, panel, alerts, frames)))),
    )
    .map_err(|e| eyre!("UI terminated with error: {}", e))?;

    if shutdown.send(UserIntent::Shutdown).await.is_err() {
        warn!("Engine already stopped");
    }
    task.await?;
    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Config from the first CLI argument, or the per-user default location
async fn setup_config() -> Result<AppConfig> {
    let path = match std::env::args().nth(1) {
        Some(path) => PathBuf::from(path),
        None => config::default_path()?,
    };

    AppConfig::ensure_default(&path).await?;
    let app_config = AppConfig::load(&path).await?;
    Ok(app_config)
}
