use super::CaptureDevice;
use crate::config::AudioConfig;
use crate::error::{DeviceKind, Result, StreamError};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

const TONE_AMPLITUDE: f64 = 0.3;

/// Microphone stand-in producing a 16-bit PCM sine tone in real time.
///
/// One chunk of `frames_per_chunk` interleaved frames is released per
/// chunk duration, the same cadence a hardware recorder would have.
pub struct SyntheticMicrophone {
    sample_rate: u32,
    channels: u16,
    frames_per_chunk: usize,
    tone_hz: f64,
    chunk_duration: Duration,
    phase: f64,
    pacing: Option<Interval>,
    frames_read: u64,
}

impl SyntheticMicrophone {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            frames_per_chunk: audio.frames_per_chunk,
            tone_hz: audio.tone_hz as f64,
            chunk_duration: audio.chunk_duration(),
            phase: 0.0,
            pacing: None,
            frames_read: 0,
        }
    }

    fn next_chunk(&mut self) -> Bytes {
        let step = TAU * self.tone_hz / self.sample_rate as f64;
        let mut buf = BytesMut::with_capacity(self.frames_per_chunk * self.channels as usize * 2);

        for _ in 0..self.frames_per_chunk {
            let sample = (self.phase.sin() * TONE_AMPLITUDE * i16::MAX as f64) as i16;
            for _ in 0..self.channels {
                buf.put_i16_le(sample);
            }
            self.phase = (self.phase + step) % TAU;
        }

        buf.freeze()
    }
}

#[async_trait]
impl CaptureDevice for SyntheticMicrophone {
    async fn open(&mut self) -> Result<()> {
        if self.pacing.is_some() {
            return Err(StreamError::DeviceResourceFailure {
                device: DeviceKind::Capture,
                reason: "already recording".to_string(),
            });
        }

        let mut pacing = interval(self.chunk_duration);
        pacing.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.pacing = Some(pacing);

        info!(
            "🎙️ Synthetic microphone open: {} Hz, {} ch, {:.0} Hz tone",
            self.sample_rate, self.channels, self.tone_hz
        );
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let pacing = self
            .pacing
            .as_mut()
            .ok_or_else(|| StreamError::DeviceResourceFailure {
                device: DeviceKind::Capture,
                reason: "read before open".to_string(),
            })?;
        pacing.tick().await;

        self.frames_read += 1;
        Ok(Some(self.next_chunk()))
    }

    async fn release(&mut self) {
        if self.pacing.take().is_some() {
            debug!("Synthetic microphone released after {} chunks", self.frames_read);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_audio() -> AudioConfig {
        AudioConfig {
            sample_rate: 8_000,
            channels: 2,
            frames_per_chunk: 80,
            tone_hz: 1_000.0,
            output_path: None,
        }
    }

    #[tokio::test]
    async fn test_frames_are_pcm16_chunks() {
        let audio = small_audio();
        let mut mic = SyntheticMicrophone::new(&audio);
        mic.open().await.unwrap();

        let frame = mic.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.len(), audio.chunk_bytes());
        // First sample sits at phase 0
        assert_eq!(&frame[..4], &[0, 0, 0, 0]);
        // Both channels carry the same sample
        assert_eq!(&frame[4..6], &frame[6..8]);

        mic.release().await;
    }

    #[tokio::test]
    async fn test_read_requires_open() {
        let mut mic = SyntheticMicrophone::new(&small_audio());
        assert!(matches!(
            mic.read_frame().await,
            Err(StreamError::DeviceResourceFailure {
                device: DeviceKind::Capture,
                ..
            })
        ));

        mic.open().await.unwrap();
        assert!(mic.open().await.is_err());
    }
}
