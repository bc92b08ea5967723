use anyhow::{Context, Result};
use clap::{Arg, Command};
use device_streamer::config::{AppConfig, ConfigManager, EnvConfigOverride};
use device_streamer::device::{FileSpeaker, NullSpeaker, PlaybackDevice, SyntheticMicrophone};
use device_streamer::{
    DeviceIdentity, MessageTransport, QuicTransport, SessionDevices, SessionState, StreamSession,
    TracingObserver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("device-streamer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Records audio into a platform data stream and plays it back")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file, created with defaults if missing")
                .default_value("device-streamer.toml"),
        )
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("HOST:PORT")
                .help("Platform server address"),
        )
        .arg(
            Arg::new("device-id")
                .short('d')
                .long("device-id")
                .value_name("ID")
                .help("Hardware id of this device"),
        )
        .arg(
            Arg::new("content-type")
                .long("content-type")
                .value_name("TYPE")
                .help("Content type of the created stream"),
        )
        .arg(
            Arg::new("capture-secs")
                .long("capture-secs")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .help("Length of the recording window"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write played audio to this raw PCM file"),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("device-streamer.toml"));
    let mut manager = ConfigManager::new(config_path.clone());
    manager
        .load()
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    EnvConfigOverride::apply_overrides(manager.get_config_mut());
    apply_cli_overrides(manager.get_config_mut(), &matches)?;
    let config = manager.into_config();
    config.validate()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_target(false)
        .init();

    info!("🎙️ Device streamer starting...");
    info!("  Device ID: {}", config.device.hardware_id);
    info!("  Content type: {}", config.session.content_type);
    info!("  Capture window: {:?}", config.session.capture_window);

    let server_addr = config.server_addr()?;
    info!("Connecting to platform: {}", server_addr);
    let (transport, inbound) = QuicTransport::connect(server_addr, &config.server)
        .await
        .context("Failed to connect to platform")?;
    let transport = Arc::new(transport);
    info!("✓ QUIC connection established");

    let playback: Box<dyn PlaybackDevice> = match &config.audio.output_path {
        Some(path) => Box::new(FileSpeaker::new(path)),
        None => Box::new(NullSpeaker::new()),
    };
    let devices = SessionDevices {
        capture: Box::new(SyntheticMicrophone::new(&config.audio)),
        playback,
    };

    let mut identity = DeviceIdentity::new(config.device.hardware_id.clone());
    if let Some(token) = &config.device.specification_token {
        identity = identity.with_specification(token.clone());
    }

    let session = StreamSession::new(
        &config,
        identity,
        transport.clone(),
        inbound,
        devices,
        Arc::new(TracingObserver),
    );
    let handle = session.begin();

    tokio::select! {
        _ = handle.wait_for(SessionState::Finished) => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down session");
            handle.shutdown();
        }
    }

    let result = handle.join().await;
    transport.close().await;

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(server) = matches.get_one::<String>("server") {
        let (host, port) = server
            .rsplit_once(':')
            .with_context(|| format!("Server address must be HOST:PORT, got {}", server))?;
        config.server.address = host.to_string();
        config.server.port = port
            .parse()
            .with_context(|| format!("Invalid server port: {}", port))?;
    }
    if let Some(id) = matches.get_one::<String>("device-id") {
        config.device.hardware_id = id.clone();
    }
    if let Some(content_type) = matches.get_one::<String>("content-type") {
        config.session.content_type = content_type.clone();
    }
    if let Some(secs) = matches.get_one::<u64>("capture-secs") {
        config.session.capture_window = Duration::from_secs(*secs);
    }
    if let Some(output) = matches.get_one::<String>("output") {
        config.audio.output_path = Some(PathBuf::from(output));
    }
    Ok(())
}
