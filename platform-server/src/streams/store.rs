use common::StreamCreateOutcome;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Chunk of {size} bytes exceeds limit of {limit}")]
    ChunkTooLarge { size: usize, limit: usize },

    #[error("Stream {stream_id} belongs to another device")]
    NotOwner { stream_id: String },
}

struct StoredStream {
    owner: String,
    content_type: String,
    chunks: BTreeMap<u64, Vec<u8>>,
    created_at: SystemTime,
}

/// In-memory data streams, keyed by stream id
#[derive(Clone)]
pub struct StreamStore {
    streams: Arc<DashMap<String, StoredStream>>,
    /// Streams held, counted against `max_streams`
    held: Arc<AtomicUsize>,
    max_streams: usize,
    max_chunk_size: usize,
}

impl StreamStore {
    pub fn new(max_streams: usize, max_chunk_size: usize) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            held: Arc::new(AtomicUsize::new(0)),
            max_streams,
            max_chunk_size,
        }
    }

    pub fn create(&self, device_id: &str, stream_id: &str, content_type: &str) -> StreamCreateOutcome {
        // The entry lock covers the quota check and the insert
        let vacant = match self.streams.entry(stream_id.to_string()) {
            Entry::Occupied(_) => {
                debug!("Stream {} already exists", stream_id);
                return StreamCreateOutcome::AlreadyExists;
            }
            Entry::Vacant(vacant) => vacant,
        };

        let reserved = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |held| {
                (held < self.max_streams).then_some(held + 1)
            });
        if reserved.is_err() {
            warn!("Refusing stream {}: {} streams held", stream_id, self.max_streams);
            return StreamCreateOutcome::Failed {
                reason: "quota exceeded".to_string(),
            };
        }

        vacant.insert(StoredStream {
            owner: device_id.to_string(),
            content_type: content_type.to_string(),
            chunks: BTreeMap::new(),
            created_at: SystemTime::now(),
        });
        info!("✓ Stream created: {} ({}) for {}", stream_id, content_type, device_id);
        StreamCreateOutcome::Created
    }

    /// Store a pushed chunk. A redelivered chunk replaces the earlier copy.
    pub fn append(
        &self,
        device_id: &str,
        stream_id: &str,
        sequence_number: u64,
        data: Vec<u8>,
    ) -> Result<(), StoreError> {
        if data.len() > self.max_chunk_size {
            return Err(StoreError::ChunkTooLarge {
                size: data.len(),
                limit: self.max_chunk_size,
            });
        }

        let mut stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StoreError::UnknownStream(stream_id.to_string()))?;
        if stream.owner != device_id {
            return Err(StoreError::NotOwner {
                stream_id: stream_id.to_string(),
            });
        }

        stream.chunks.insert(sequence_number, data);
        Ok(())
    }

    /// Chunk at `sequence_number`; empty once past the last stored chunk
    pub fn chunk(&self, stream_id: &str, sequence_number: u64) -> Result<Vec<u8>, StoreError> {
        let stream = self
            .streams
            .get(stream_id)
            .ok_or_else(|| StoreError::UnknownStream(stream_id.to_string()))?;
        Ok(stream
            .chunks
            .get(&sequence_number)
            .cloned()
            .unwrap_or_default())
    }

    pub fn chunk_count(&self, stream_id: &str) -> usize {
        self.streams
            .get(stream_id)
            .map(|entry| entry.chunks.len())
            .unwrap_or(0)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Drop every stream owned by a device, returning how many were removed
    pub fn remove_device_streams(&self, device_id: &str) -> usize {
        let mut removed = 0;
        self.streams.retain(|stream_id, stream| {
            let keep = stream.owner != device_id;
            if !keep {
                removed += 1;
                debug!(
                    "Dropping {} stream {} ({} chunks, age {:?})",
                    stream.content_type,
                    stream_id,
                    stream.chunks.len(),
                    stream.created_at.elapsed().unwrap_or_default()
                );
            }
            keep
        });
        self.held.fetch_sub(removed, Ordering::SeqCst);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_already_exists() {
        let store = StreamStore::new(4, 1024);
        assert_eq!(store.create("dev", "abc", "audio/L16"), StreamCreateOutcome::Created);
        assert_eq!(
            store.create("dev", "abc", "audio/L16"),
            StreamCreateOutcome::AlreadyExists
        );
        assert_eq!(store.stream_count(), 1);
    }

    #[test]
    fn test_quota_exceeded() {
        let store = StreamStore::new(1, 1024);
        store.create("dev", "one", "audio/L16");
        assert_eq!(
            store.create("dev", "two", "audio/L16"),
            StreamCreateOutcome::Failed {
                reason: "quota exceeded".to_string()
            }
        );
        // An existing stream is still acknowledged when full
        assert_eq!(
            store.create("dev", "one", "audio/L16"),
            StreamCreateOutcome::AlreadyExists
        );
    }

    #[test]
    fn test_pull_past_end_is_empty() {
        let store = StreamStore::new(4, 1024);
        store.create("dev", "abc", "audio/L16");
        store.append("dev", "abc", 0, vec![1, 2, 3]).unwrap();
        store.append("dev", "abc", 1, vec![4]).unwrap();

        assert_eq!(store.chunk("abc", 0).unwrap(), vec![1, 2, 3]);
        assert_eq!(store.chunk("abc", 1).unwrap(), vec![4]);
        assert!(store.chunk("abc", 2).unwrap().is_empty());
        assert_eq!(
            store.chunk("zzz", 0),
            Err(StoreError::UnknownStream("zzz".to_string()))
        );
    }

    #[test]
    fn test_redelivered_chunk_replaces_copy() {
        let store = StreamStore::new(4, 1024);
        store.create("dev", "abc", "audio/L16");
        store.append("dev", "abc", 0, vec![1]).unwrap();
        store.append("dev", "abc", 0, vec![1]).unwrap();
        assert_eq!(store.chunk_count("abc"), 1);
    }

    #[test]
    fn test_append_limits() {
        let store = StreamStore::new(4, 2);
        store.create("dev", "abc", "audio/L16");

        assert_eq!(
            store.append("dev", "abc", 0, vec![0; 3]),
            Err(StoreError::ChunkTooLarge { size: 3, limit: 2 })
        );
        assert!(matches!(
            store.append("other", "abc", 0, vec![0]),
            Err(StoreError::NotOwner { .. })
        ));
        assert!(matches!(
            store.append("dev", "nope", 0, vec![0]),
            Err(StoreError::UnknownStream(_))
        ));
    }

    #[test]
    fn test_concurrent_creates_respect_quota() {
        let store = StreamStore::new(3, 1024);
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = format!("s{}", i % 8);
                    let outcome = store.create("dev", &id, "audio/L16");
                    if outcome == StreamCreateOutcome::Created {
                        store.append("dev", &id, 0, vec![i as u8]).unwrap();
                    }
                    (id, outcome)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created: Vec<_> = outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == StreamCreateOutcome::Created)
            .map(|(id, _)| id.clone())
            .collect();
        assert_eq!(created.len(), 3);
        let mut unique = created.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3, "a stream id was created twice");
        assert_eq!(store.stream_count(), 3);
        for id in &created {
            assert_eq!(store.chunk_count(id), 1);
        }
    }

    #[test]
    fn test_remove_device_streams() {
        let store = StreamStore::new(4, 1024);
        store.create("dev", "a", "audio/L16");
        store.create("dev", "b", "audio/L16");
        store.create("other", "c", "audio/L16");

        assert_eq!(store.remove_device_streams("dev"), 2);
        assert_eq!(store.stream_count(), 1);

        // Freed quota can be reused
        assert_eq!(store.create("dev", "d", "audio/L16"), StreamCreateOutcome::Created);
    }
}
