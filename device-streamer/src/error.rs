use common::TransportError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Transport send failure: {0}")]
    TransportSendFailure(#[from] TransportError),

    #[error("Stream creation rejected: {reason}")]
    StreamCreateFailure { reason: String },

    #[error("Device registration rejected: {reason}")]
    RegistrationFailure { reason: String },

    #[error("Malformed acknowledgement: {details}")]
    MalformedAcknowledgement { details: String },

    #[error("{device} device unavailable: {reason}")]
    DeviceResourceFailure { device: DeviceKind, reason: String },

    #[error("No {waiting_for} received within {timeout:?}")]
    AckTimeout {
        waiting_for: &'static str,
        timeout: Duration,
    },

    #[error("Invalid stream state: {details}")]
    InvalidState { details: String },

    #[error("Invalid sequence number: expected {expected}, got {actual}")]
    InvalidSequence { expected: u64, actual: u64 },

    #[error("Pull request for sequence {sequence_number} still outstanding")]
    RequestOutstanding { sequence_number: u64 },

    #[error("Chunk buffer closed")]
    BufferClosed,

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("Inbound message channel closed")]
    InboundClosed,

    #[error("Session cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl StreamError {
    /// Whether the operation that produced this error may be attempted again.
    ///
    /// Only transport hiccups and missing acknowledgements are retried; a
    /// rejection from the server or a local device fault is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::TransportSendFailure(err) => !matches!(err, TransportError::Closed),
            StreamError::AckTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Which local device failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Capture,
    Playback,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Capture => write!(f, "capture"),
            DeviceKind::Playback => write!(f, "playback"),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
