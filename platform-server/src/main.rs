mod config;
mod device;
mod quic;
mod streams;

use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🚀 Platform server starting...");

    let config = config::Config::load()?;
    info!("✓ Configuration loaded");

    let device_manager = device::DeviceManager::new(config.specifications.clone());
    let stream_store = streams::StreamStore::new(config.max_streams, config.max_chunk_size);
    info!(
        "✓ Managers initialized (max {} streams, {} byte chunks)",
        config.max_streams, config.max_chunk_size
    );

    let quic_addr = config.quic_addr();
    let quic_server = quic::QuicServer::new(
        quic_addr
            .parse()
            .with_context(|| format!("Invalid listen address: {}", quic_addr))?,
        device_manager,
        stream_store,
    )?;
    info!("✓ QUIC server listening on {}", quic_server.local_addr()?);

    tokio::select! {
        result = quic_server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
