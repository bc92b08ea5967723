use crate::device::DeviceManager;
use crate::streams::StreamStore;
use anyhow::{Context, Result};
use quinn::{Endpoint, IdleTimeout, ServerConfig, TransportConfig, VarInt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub struct QuicServer {
    endpoint: Endpoint,
    devices: DeviceManager,
    streams: StreamStore,
}

impl QuicServer {
    pub fn new(addr: SocketAddr, devices: DeviceManager, streams: StreamStore) -> Result<Self> {
        // 自签名证书
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .context("Failed to generate certificate")?;
        let cert_der = cert.serialize_der().context("Failed to serialize certificate")?;
        let key_der = cert.serialize_private_key_der();

        let mut server_config = ServerConfig::with_single_cert(
            vec![rustls::Certificate(cert_der)],
            rustls::PrivateKey(key_der),
        )
        .context("Invalid server certificate")?;

        // Devices open one uni stream per message
        let mut transport_config = TransportConfig::default();
        transport_config.max_concurrent_uni_streams(VarInt::from_u32(100));
        transport_config.max_concurrent_bidi_streams(VarInt::from_u32(0));
        transport_config.max_idle_timeout(Some(IdleTimeout::try_from(Duration::from_secs(300))?));
        transport_config.keep_alive_interval(Some(Duration::from_secs(5)));
        server_config.transport_config(Arc::new(transport_config));

        let endpoint = Endpoint::server(server_config, addr)
            .with_context(|| format!("Failed to bind {}", addr))?;

        Ok(Self {
            endpoint,
            devices,
            streams,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    pub async fn run(&self) -> Result<()> {
        info!("QUIC server running...");

        while let Some(conn) = self.endpoint.accept().await {
            let devices = self.devices.clone();
            let streams = self.streams.clone();

            tokio::spawn(async move {
                match conn.await {
                    Ok(connection) => {
                        info!("New QUIC connection from: {}", connection.remote_address());
                        if let Err(e) =
                            super::connection::handle_connection(connection, devices, streams).await
                        {
                            error!("Connection error: {}", e);
                        }
                    }
                    Err(e) => {
                        error!("Connection failed: {}", e);
                    }
                }
            });
        }

        Ok(())
    }
}
