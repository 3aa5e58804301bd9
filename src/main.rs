mod audio;
mod codec;
mod config;
mod controller;
mod error;
mod gui_bridge;
mod net_link;
mod persona;
mod pipeline;
mod protocol;
mod scheduler;
#[cfg(test)]
mod testing;
mod transport;

use audio::{AlsaCapture, AlsaPlayback};
use config::Config;
use controller::{ControlCommand, SessionController};
use gui_bridge::GuiBridge;
use net_link::LiveTransport;
use pipeline::CapturePipeline;
use scheduler::PlaybackScheduler;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

// inbound model audio is mono
const OUTPUT_CHANNELS: usize = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::new().unwrap_or_default().with_env_overrides();
    log::info!("{} v{} starting", config.app_name, config.app_version);
    if config.api_key().is_none() {
        log::warn!(
            "API key is missing. Please set the {} environment variable.",
            config.api_key_env
        );
    }

    let audio_config = config.audio();

    // control commands from the UI and from Ctrl+C
    let (tx_cmd, rx_cmd) = mpsc::channel::<ControlCommand>(16);

    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_cmd.clone()).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    // playback runs for the whole process; capture is acquired per recording
    let (tx_finished, rx_finished) = mpsc::unbounded_channel();
    let playback = AlsaPlayback::start(&audio_config, tx_finished)?;
    let scheduler = PlaybackScheduler::new(
        Box::new(playback),
        audio_config.output_sample_rate,
        OUTPUT_CHANNELS,
    );
    let pipeline = CapturePipeline::new(
        Box::new(AlsaCapture::new(audio_config.clone())),
        audio_config.block_size,
        audio_config.input_sample_rate,
    );

    let mut controller = SessionController::new(
        Arc::new(LiveTransport::new(&config)),
        persona::from_config(&config),
        pipeline,
        scheduler,
        rx_finished,
    );

    // mirror every status change to the UI
    let mut status_rx = controller.subscribe();
    let gui_status = gui_bridge.clone();
    tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let report = status_rx.borrow_and_update().clone();
            if let Err(e) = gui_status.send_status(&report).await {
                log::debug!("Failed to send status to GUI: {}", e);
            }
        }
    });

    let tx_signal = tx_cmd.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down...");
            let _ = tx_signal.send(ControlCommand::Shutdown).await;
        }
    });
    drop(tx_cmd);

    // both only start work; the loop below finishes it
    if controller.initialize().is_ok() && config.auto_record {
        if let Err(e) = controller.record() {
            log::error!("Auto-record failed: {}", e);
        }
    }

    log::info!("Session controller started. State: {:?}", controller.state());
    controller.run(rx_cmd).await;
    Ok(())
}
