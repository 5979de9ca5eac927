mod http;
mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use doorhub_core::bus::MqttBus;
use doorhub_core::camera::{Camera, TestPatternCamera};
use doorhub_core::control::CaptureStateMachine;
use doorhub_core::router::{EventRouter, FfplayAlert, Trigger};
use doorhub_core::vision::VisionClient;
use doorhub_core::{logging, Config, FrameBuffer, OperatingMode};

use server::{DoorhubServer, Services};

#[derive(Debug, Parser)]
#[command(name = "doorhub", about = "Smart doorbell hub")]
struct Args {
    /// Configuration file path
    #[arg(long, env = "DOORHUB_CONFIG")]
    config: Option<String>,

    /// Trigger operating mode (manual|motion)
    #[arg(long, env = "DOORHUB_MODE")]
    mode: Option<OperatingMode>,

    /// Serve HTTPS instead of HTTP (on|off)
    #[arg(long, env = "DOORHUB_SECURE", value_parser = parse_on_off)]
    secure: Option<bool>,
}

fn parse_on_off(value: &str) -> Result<bool, String> {
    match value.to_lowercase().as_str() {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("invalid value '{other}' (expected on|off)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration, then apply CLI overrides
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.control.mode = mode;
    }
    if let Some(secure) = args.secure {
        config.server.secure = secure;
    }

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Doorhub starting...");
    info!("Server address: {}", config.http_address());
    info!(mode = ?config.control.mode, "Trigger mode");

    // 4. Camera collaborator
    let camera: Arc<dyn Camera> = Arc::new(TestPatternCamera::new());
    camera
        .configure(config.camera.width, config.camera.height)
        .await?;

    // 5. Message bus client (the event loop is driven by the server)
    let (bus, bus_events) = MqttBus::connect(&config.bus);

    // 6. Control plane
    let control = Arc::new(CaptureStateMachine::new(
        camera.clone(),
        Arc::new(bus.clone()),
        config.control.mode,
        std::time::Duration::from_secs(config.control.override_reset_seconds),
    ));

    // 7. Vision client (optional; disabled without an API key)
    let vision = VisionClient::from_config(&config.vision).map(Arc::new);
    if vision.is_none() {
        info!(
            "Vision API key not set in {}, vision queries disabled",
            config.vision.api_key_env
        );
    }

    // 8. Event router
    let alert = Arc::new(FfplayAlert::new(config.audio.alert_sound_path.clone().into()));
    let router = Arc::new(EventRouter::new(
        control.clone(),
        Arc::new(bus.clone()),
        camera.clone(),
        Arc::new(doorhub_core::audio::AudioPlayback::new(Arc::new(bus.clone()))),
        vision,
        alert,
        config.control.mode,
        std::time::Duration::from_secs(config.control.bell_cooldown_seconds),
        config.audio.volume_step,
    ));

    // 9. Hardware trigger channel. The sender side is handed to the GPIO
    // collaborator; without one the channel simply stays idle.
    let (trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(16);
    let _gpio_seam = trigger_tx;

    let services = Services {
        control,
        router,
        camera,
        buffer: FrameBuffer::new(),
    };

    // 10. Start all components
    let server = DoorhubServer::new(config, services, bus, bus_events, trigger_rx);
    server.start().await?;

    Ok(())
}
