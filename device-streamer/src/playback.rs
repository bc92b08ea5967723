use crate::buffer::ChunkConsumer;
use crate::device::PlaybackDevice;
use crate::error::Result;
use crate::observer::SessionObserver;
use crate::types::{PlaybackState, PlaybackStats};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Drains the chunk buffer into an opened playback device.
///
/// Every chunk is written to the device as soon as it is popped, but output
/// only starts once `warmup_chunks` chunks have been consumed. A stream that
/// ends before reaching the threshold is flushed by starting playback anyway.
/// On cancellation the worker stops at once without flushing.
pub struct PlaybackWorker {
    consumer: ChunkConsumer,
    device: Box<dyn PlaybackDevice>,
    warmup_chunks: usize,
    observer: Arc<dyn SessionObserver>,
    state: watch::Sender<PlaybackState>,
}

impl PlaybackWorker {
    pub fn new(
        consumer: ChunkConsumer,
        device: Box<dyn PlaybackDevice>,
        warmup_chunks: usize,
        observer: Arc<dyn SessionObserver>,
        state: watch::Sender<PlaybackState>,
    ) -> Self {
        Self {
            consumer,
            device,
            warmup_chunks: warmup_chunks.max(1),
            observer,
            state,
        }
    }

    /// Run until the buffer is drained or cancelled, then release the device
    pub async fn run(mut self) -> Result<PlaybackStats> {
        let mut stats = PlaybackStats::default();
        self.set_state(PlaybackState::WarmingUp);

        let result = self.drain(&mut stats).await;

        self.device.release().await;
        self.set_state(PlaybackState::Stopped);
        info!(
            "Playback stopped: {} chunks, {} bytes",
            stats.chunks_played, stats.bytes_played
        );

        result.map(|_| stats)
    }

    async fn drain(&mut self, stats: &mut PlaybackStats) -> Result<()> {
        // Sequence numbers written during warm-up, reported once output starts
        let mut warming: Vec<u64> = Vec::with_capacity(self.warmup_chunks);
        let mut consumed = 0usize;

        while let Some(chunk) = self.consumer.pop().await {
            if let Err(e) = self.device.write(&chunk.payload).await {
                warn!("Playback write failed: {}", e);
                return Err(e);
            }
            consumed += 1;
            stats.chunks_played += 1;
            stats.bytes_played += chunk.len() as u64;

            if stats.started {
                self.observer.on_playback_chunk(chunk.sequence_number);
                continue;
            }

            warming.push(chunk.sequence_number);
            debug!("Warm-up {}/{}", consumed, self.warmup_chunks);
            if consumed >= self.warmup_chunks {
                self.start(stats, &mut warming).await?;
            }
        }

        if !stats.started && !warming.is_empty() && !self.consumer.is_cancelled() {
            debug!("Stream ended during warm-up, flushing {} chunks", warming.len());
            self.start(stats, &mut warming).await?;
        }

        Ok(())
    }

    async fn start(&mut self, stats: &mut PlaybackStats, warming: &mut Vec<u64>) -> Result<()> {
        self.device.play().await?;
        stats.started = true;
        self.set_state(PlaybackState::Playing);
        self.observer.on_playback_started();
        for sequence_number in warming.drain(..) {
            self.observer.on_playback_chunk(sequence_number);
        }
        Ok(())
    }

    fn set_state(&self, state: PlaybackState) {
        self.state.send_replace(state);
        self.observer.on_playback_state_changed(state);
    }
}
