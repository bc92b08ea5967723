// Scripted devices for driving a session without audio hardware.
//
// Both hand out a shared log handle so the caller can inspect what happened
// after the session has taken ownership of the device.

use super::{CaptureDevice, PlaybackDevice};
use crate::error::{DeviceKind, Result, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What a scripted device has been asked to do
#[derive(Debug, Default, Clone)]
pub struct DeviceLog {
    pub opened: bool,
    pub released: bool,
    pub written: Vec<Bytes>,
    pub play_calls: usize,
    /// Number of writes that had been made when `play` was first called
    pub writes_before_play: Option<usize>,
    pub frames_read: usize,
}

fn lock(log: &Arc<Mutex<DeviceLog>>) -> MutexGuard<'_, DeviceLog> {
    // Poisoning only means another holder panicked; the log is still valid
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Capture device that replays a fixed list of frames, then reports exhaustion
pub struct ScriptedCapture {
    frames: VecDeque<Bytes>,
    frame_interval: Option<Duration>,
    fail_open: bool,
    log: Arc<Mutex<DeviceLog>>,
}

impl ScriptedCapture {
    pub fn new<I, B>(frames: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
            frame_interval: None,
            fail_open: false,
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    /// Capture device whose `open` fails, as when the microphone is busy
    pub fn unavailable() -> Self {
        let mut capture = Self::new(Vec::<Bytes>::new());
        capture.fail_open = true;
        capture
    }

    /// Wait this long before handing out each frame
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn log(&self) -> Arc<Mutex<DeviceLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(StreamError::DeviceResourceFailure {
                device: DeviceKind::Capture,
                reason: "device busy".to_string(),
            });
        }
        lock(&self.log).opened = true;
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(interval) = self.frame_interval {
            tokio::time::sleep(interval).await;
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            lock(&self.log).frames_read += 1;
        }
        Ok(frame)
    }

    async fn release(&mut self) {
        lock(&self.log).released = true;
    }
}

/// Playback device that records every call
pub struct RecordingSpeaker {
    fail_open: bool,
    log: Arc<Mutex<DeviceLog>>,
}

impl RecordingSpeaker {
    pub fn new() -> Self {
        Self {
            fail_open: false,
            log: Arc::new(Mutex::new(DeviceLog::default())),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn log(&self) -> Arc<Mutex<DeviceLog>> {
        self.log.clone()
    }
}

impl Default for RecordingSpeaker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackDevice for RecordingSpeaker {
    async fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(StreamError::DeviceResourceFailure {
                device: DeviceKind::Playback,
                reason: "no output device".to_string(),
            });
        }
        lock(&self.log).opened = true;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        lock(&self.log).written.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        let mut log = lock(&self.log);
        if log.writes_before_play.is_none() {
            log.writes_before_play = Some(log.written.len());
        }
        log.play_calls += 1;
        Ok(())
    }

    async fn release(&mut self) {
        lock(&self.log).released = true;
    }
}
