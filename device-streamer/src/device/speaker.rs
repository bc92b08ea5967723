use super::PlaybackDevice;
use crate::error::{DeviceKind, Result, StreamError};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

fn playback_error(reason: impl Into<String>) -> StreamError {
    StreamError::DeviceResourceFailure {
        device: DeviceKind::Playback,
        reason: reason.into(),
    }
}

/// Discards audio, keeping only counters
#[derive(Debug, Default)]
pub struct NullSpeaker {
    open: bool,
    playing: bool,
    bytes_written: u64,
}

impl NullSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }
}

#[async_trait]
impl PlaybackDevice for NullSpeaker {
    async fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(playback_error("write before open"));
        }
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    async fn release(&mut self) {
        self.open = false;
        self.playing = false;
        debug!("Null speaker released after {} bytes", self.bytes_written);
    }
}

/// Writes played audio to a raw PCM file
pub struct FileSpeaker {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    playing: bool,
}

impl FileSpeaker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
            playing: false,
        }
    }
}

#[async_trait]
impl PlaybackDevice for FileSpeaker {
    async fn open(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .await
            .map_err(|e| playback_error(format!("{}: {}", self.path.display(), e)))?;
        self.writer = Some(BufWriter::new(file));
        info!("🔈 Writing playback to {}", self.path.display());
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| playback_error("write before open"))?;
        writer
            .write_all(data)
            .await
            .map_err(|e| playback_error(e.to_string()))
    }

    async fn play(&mut self) -> Result<()> {
        self.playing = true;
        Ok(())
    }

    async fn release(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush {}: {}", self.path.display(), e);
            }
        }
        self.playing = false;
    }
}
