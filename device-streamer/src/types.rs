use bytes::Bytes;
use serde::Serialize;
use std::time::Instant;

/// One unit of stream payload tagged with its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_number: u64,
    pub payload: Bytes,
}

impl Chunk {
    pub fn new(sequence_number: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_number,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Identity the device presents on every outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub hardware_id: String,
    /// Token of the device specification used for registration, if any
    pub specification_token: Option<String>,
}

impl DeviceIdentity {
    pub fn new(hardware_id: impl Into<String>) -> Self {
        Self {
            hardware_id: hardware_id.into(),
            specification_token: None,
        }
    }

    pub fn with_specification(mut self, token: impl Into<String>) -> Self {
        self.specification_token = Some(token.into());
        self
    }
}

/// Stream-request protocol state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Registering,
    AwaitingStreamCreate,
    Recording,
    AwaitingChunk,
    Finished,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished | SessionState::Failed)
    }
}

/// State of the playback activity running next to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    WarmingUp,
    Playing,
    Stopped,
}

/// What a pending request is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Register,
    Create,
    Pull { sequence_number: u64 },
}

/// Outbound request awaiting its acknowledgement
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub stream_id: String,
    pub kind: RequestKind,
    pub sent_at: Instant,
}

impl PendingRequest {
    pub fn new(stream_id: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind,
            sent_at: Instant::now(),
        }
    }
}

/// Result of feeding a pull response into the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Chunk(Chunk),
    EndOfStream,
    /// Response with no matching request, e.g. a redelivered message
    Unsolicited,
}

/// Counters reported by the playback worker when it stops
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub chunks_played: u64,
    pub bytes_played: u64,
    pub started: bool,
}

/// Summary returned when a session ends
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub stream_id: Option<String>,
    pub final_state: SessionState,
    pub chunks_pushed: u64,
    pub frames_dropped: u64,
    pub chunks_pulled: u64,
    pub pull_retries: u32,
    pub playback: PlaybackStats,
}
