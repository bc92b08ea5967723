//! Device side of the data-stream transport: create a stream on the
//! platform, push captured audio into it, then pull it back for playback.

pub mod buffer;
pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod observer;
pub mod playback;
pub mod retry;
pub mod serde_helpers;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
mod buffer_test;

pub use buffer::{ChunkBuffer, ChunkConsumer, ChunkProducer};
pub use channel::StreamChannel;
pub use config::{AppConfig, ConfigManager, EnvConfigOverride};
pub use error::{DeviceKind, Result, StreamError};
pub use observer::{SessionObserver, TracingObserver};
pub use playback::PlaybackWorker;
pub use session::{SessionDevices, SessionHandle, StreamSession};
pub use transport::{MemoryTransport, MessageTransport, QuicTransport};
pub use types::*;
