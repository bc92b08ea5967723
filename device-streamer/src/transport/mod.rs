pub mod memory;
pub mod quic;

pub use memory::MemoryTransport;
pub use quic::QuicTransport;

use async_trait::async_trait;
use common::ProtocolMessage;

/// Outbound half of the device messaging transport.
///
/// Inbound messages are delivered separately through the
/// `mpsc::Receiver<ProtocolMessage>` returned when the transport is created.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send(&self, message: ProtocolMessage) -> common::Result<()>;

    async fn close(&self);
}
