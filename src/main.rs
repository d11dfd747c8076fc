use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_intercom::device::{load_pcm, ControllerConfig, RuntimeConfig, RuntimeStats};
use loqa_intercom::{
    create_router, AppState, AudioPeripherals, Config, DeviceAudioController, DeviceRuntime,
    EdgeTrigger, ErrorClass, IntercomServer, MessageBus, NatsBus, PlaybackQueue,
    ServerBackends, WavPeripherals,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "loqa-intercom", version, about = "Push-to-talk voice intercom over NATS")]
struct Cli {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/loqa-intercom")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run recognition, chat and synthesis for connected devices
    Server,
    /// Run the push-to-talk device on WAV-file peripherals.
    /// Each line on stdin toggles the talk button.
    Device,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config).context("Failed to load configuration")?;

    info!("Loqa Intercom v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Server => run_server(cfg).await,
        Command::Device => run_device(cfg).await,
    }
}

async fn run_server(cfg: Config) -> Result<()> {
    let bus: Arc<dyn MessageBus> = Arc::new(
        NatsBus::connect(&cfg.bus, "loqa-intercom-server")
            .await
            .context("Failed to connect to NATS")?,
    );

    let server = IntercomServer::start(&cfg, bus, ServerBackends::from_config(&cfg))
        .await
        .context("Failed to start intercom server")?;

    let addr = format!("{}:{}", cfg.http.bind, cfg.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP API to {}", addr))?;
    info!("HTTP API listening on {}", addr);

    let app = create_router(AppState::new(server.accumulator()));
    let http = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP API stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    http.abort();
    let _ = http.await;

    let stats = server.shutdown().await.context("Server shutdown failed")?;
    info!(
        "Published {} outbound messages in {} chunks ({} failures)",
        stats.messages, stats.chunks, stats.failures
    );

    Ok(())
}

/// Run the device, reconnecting after bus failures and restarting after any other.
async fn run_device(cfg: Config) -> Result<()> {
    let (trigger, level) = EdgeTrigger::new();
    tokio::spawn(toggle_from_stdin(trigger));

    info!("Device {} ready, press Enter to talk", cfg.device.device_id);

    loop {
        let outcome = tokio::select! {
            outcome = run_device_once(&cfg, level.clone()) => outcome,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        };

        match outcome {
            Ok(stats) => {
                info!("Talk button input closed, device stopped: {:?}", stats);
                return Ok(());
            }
            Err(e) if e.class() == ErrorClass::Transient => {
                warn!(
                    "Bus unavailable, reconnecting in {:?}: {}",
                    cfg.device.restart_delay(),
                    e
                );
            }
            Err(e) => {
                error!(
                    "Device failed, restarting in {:?}: {}",
                    cfg.device.restart_delay(),
                    e
                );
                play_restart_sound(&cfg);
            }
        }

        tokio::time::sleep(cfg.device.restart_delay()).await;
    }
}

async fn run_device_once(
    cfg: &Config,
    level: watch::Receiver<bool>,
) -> loqa_intercom::error::Result<RuntimeStats> {
    let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&cfg.bus, &cfg.device.device_id).await?);

    let peripherals = WavPeripherals::new(&cfg.device.input_wav, &cfg.device.output_wav);
    let controller = DeviceAudioController::new(
        Box::new(peripherals),
        bus.clone(),
        ControllerConfig::from(cfg),
    );
    let queue = Arc::new(PlaybackQueue::new(cfg.device.playback_queue_capacity));

    let mut runtime = DeviceRuntime::new(controller, bus, queue, RuntimeConfig::from(cfg));

    if let Some(path) = &cfg.device.startup_sound {
        match load_pcm(path) {
            Ok((pcm, _)) => runtime = runtime.with_startup_sound(pcm),
            Err(e) => warn!("No startup sound: {}", e),
        }
    }

    runtime.run(level).await
}

fn play_restart_sound(cfg: &Config) {
    let Some(path) = &cfg.device.restart_sound else {
        return;
    };

    let played = load_pcm(path).and_then(|(pcm, _)| {
        let mut peripherals = WavPeripherals::new(&cfg.device.input_wav, &cfg.device.output_wav);
        let mut output = peripherals.open_output(cfg.device.output_sample_rate)?;
        output.write(&pcm)
    });

    if let Err(e) = played {
        warn!("Failed to play restart sound: {}", e);
    }
}

/// Each line on stdin flips the talk button level.
async fn toggle_from_stdin(trigger: EdgeTrigger) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pressed = false;

    while let Ok(Some(_)) = lines.next_line().await {
        pressed = !pressed;
        info!("Talk button {}", if pressed { "pressed" } else { "released" });
        trigger.set_level(pressed);
    }
}
