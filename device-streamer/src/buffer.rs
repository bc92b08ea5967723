use crate::error::{Result, StreamError};
use crate::types::Chunk;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Bounded FIFO handoff between the receive path and the playback path.
///
/// The producer waits while the buffer is full and never drops a chunk.
/// The consumer waits while it is empty, and is woken either by the next
/// chunk, by the producer closing, or by cancellation.
pub struct ChunkBuffer;

impl ChunkBuffer {
    pub fn bounded(
        capacity: usize,
        cancel: CancellationToken,
    ) -> Result<(ChunkProducer, ChunkConsumer)> {
        if capacity == 0 {
            return Err(StreamError::Configuration {
                message: "Chunk buffer capacity must be greater than 0".to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel(capacity);
        let queued = Arc::new(AtomicUsize::new(0));

        let producer = ChunkProducer {
            sender,
            queued: queued.clone(),
        };
        let consumer = ChunkConsumer {
            receiver,
            queued,
            capacity,
            cancel,
        };
        Ok((producer, consumer))
    }
}

pub struct ChunkProducer {
    sender: mpsc::Sender<Chunk>,
    queued: Arc<AtomicUsize>,
}

impl ChunkProducer {
    /// Append a chunk, waiting for space if the buffer is full
    pub async fn push(&self, chunk: Chunk) -> Result<()> {
        let permit = self
            .sender
            .reserve()
            .await
            .map_err(|_| StreamError::BufferClosed)?;
        self.queued.fetch_add(1, Ordering::SeqCst);
        debug!("Buffered chunk #{} ({} bytes)", chunk.sequence_number, chunk.len());
        permit.send(chunk);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Stop producing. The consumer drains what is queued, then sees the end.
    pub fn close(self) {
        drop(self);
    }
}

pub struct ChunkConsumer {
    receiver: mpsc::Receiver<Chunk>,
    queued: Arc<AtomicUsize>,
    capacity: usize,
    cancel: CancellationToken,
}

impl ChunkConsumer {
    /// Take the oldest chunk.
    ///
    /// Returns `None` once the producer is closed and the queue is drained,
    /// or as soon as the buffer's cancellation token fires.
    pub async fn pop(&mut self) -> Option<Chunk> {
        let chunk = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            chunk = self.receiver.recv() => chunk,
        };
        if chunk.is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
        }
        chunk
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
