use super::MessageTransport;
use crate::config::ServerConfig;
use async_trait::async_trait;
use common::{ProtocolMessage, TransportError, MAX_MESSAGE_SIZE};
use quinn::{ClientConfig, Connection, Endpoint, IdleTimeout};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Capacity of the inbound queue between the receive pump and the session
const INBOUND_QUEUE: usize = 100;

/// QUIC transport to the platform.
///
/// Every message travels on its own unidirectional stream. Inbound streams
/// are accepted and decoded in arrival order by a pump task that forwards
/// them to the receiver returned from [`QuicTransport::connect`].
pub struct QuicTransport {
    endpoint: Endpoint,
    connection: Connection,
}

impl QuicTransport {
    pub async fn connect(
        server_addr: SocketAddr,
        config: &ServerConfig,
    ) -> common::Result<(Self, mpsc::Receiver<ProtocolMessage>)> {
        let bind_addr: SocketAddr = if server_addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0, 0, 0, 0], 0))
        };
        let mut endpoint = Endpoint::client(bind_addr).map_err(|e| {
            TransportError::ConnectionFailed {
                reason: e.to_string(),
            }
        })?;
        endpoint.set_default_client_config(client_config(config)?);

        let connection = endpoint
            .connect(server_addr, &config.server_name)
            .map_err(|e| TransportError::ConnectionFailed {
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to platform at {}", server_addr);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);
        tokio::spawn(receive_loop(connection.clone(), inbound_tx));

        Ok((
            Self {
                endpoint,
                connection,
            },
            inbound_rx,
        ))
    }
}

#[async_trait]
impl MessageTransport for QuicTransport {
    async fn send(&self, message: ProtocolMessage) -> common::Result<()> {
        let message_type = message.message_type;
        let send_failed = |reason: String| TransportError::SendFailed {
            message_type,
            reason,
        };

        if let Some(reason) = self.connection.close_reason() {
            return Err(TransportError::ConnectionLost {
                reason: reason.to_string(),
            });
        }

        let data = message.encode()?;
        let mut stream = self
            .connection
            .open_uni()
            .await
            .map_err(|e| send_failed(e.to_string()))?;
        stream
            .write_all(&data)
            .await
            .map_err(|e| send_failed(e.to_string()))?;
        stream
            .finish()
            .await
            .map_err(|e| send_failed(e.to_string()))?;

        debug!("Sent {:?} ({} bytes)", message_type, data.len());
        Ok(())
    }

    async fn close(&self) {
        self.connection.close(0u32.into(), b"client disconnect");
        self.endpoint.wait_idle().await;
    }
}

async fn receive_loop(connection: Connection, inbound: mpsc::Sender<ProtocolMessage>) {
    loop {
        let mut stream = match connection.accept_uni().await {
            Ok(stream) => stream,
            Err(e) => {
                info!("Inbound stream closed: {}", e);
                break;
            }
        };

        let data = match stream.read_to_end(MAX_MESSAGE_SIZE).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to read inbound message: {}", e);
                continue;
            }
        };

        match ProtocolMessage::decode(&data) {
            Ok(message) => {
                debug!("Received {:?}", message.message_type);
                if inbound.send(message).await.is_err() {
                    debug!("Inbound receiver dropped, stopping pump");
                    break;
                }
            }
            Err(e) => warn!("Discarding undecodable message: {}", e),
        }
    }
}

fn client_config(config: &ServerConfig) -> common::Result<ClientConfig> {
    // Demo platform uses a self-signed certificate
    let crypto = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

    let idle_timeout =
        IdleTimeout::try_from(config.idle_timeout).map_err(|e| TransportError::ConnectionFailed {
            reason: format!("Invalid idle timeout: {}", e),
        })?;

    let mut client_config = ClientConfig::new(Arc::new(crypto));
    let mut transport_config = quinn::TransportConfig::default();
    transport_config.max_concurrent_uni_streams(100_u32.into());
    transport_config.max_idle_timeout(Some(idle_timeout));
    transport_config.keep_alive_interval(Some(config.keep_alive_interval));
    client_config.transport_config(Arc::new(transport_config));
    Ok(client_config)
}

struct SkipServerVerification;

impl rustls::client::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
