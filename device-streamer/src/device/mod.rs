pub mod capture;
pub mod mock;
pub mod speaker;

pub use capture::SyntheticMicrophone;
pub use mock::{DeviceLog, RecordingSpeaker, ScriptedCapture};
pub use speaker::{FileSpeaker, NullSpeaker};

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Source of recorded frames
#[async_trait]
pub trait CaptureDevice: Send {
    async fn open(&mut self) -> Result<()>;

    /// Next captured frame, or `None` once the source is exhausted
    async fn read_frame(&mut self) -> Result<Option<Bytes>>;

    async fn release(&mut self);
}

/// Sink for played-back audio.
///
/// Data written before [`PlaybackDevice::play`] is queued by the device and
/// rendered once playback starts.
#[async_trait]
pub trait PlaybackDevice: Send {
    async fn open(&mut self) -> Result<()>;

    async fn write(&mut self, data: &[u8]) -> Result<()>;

    async fn play(&mut self) -> Result<()>;

    async fn release(&mut self);
}
