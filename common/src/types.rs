use serde::{Deserialize, Serialize};

/// Result of a device registration request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RegistrationOutcome {
    AlreadyRegistered,
    NewRegistration,
    Error { reason: String },
}

impl RegistrationOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RegistrationOutcome::Error { .. })
    }
}

/// Result of a stream create request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StreamCreateOutcome {
    Created,
    AlreadyExists,
    Failed { reason: String },
}

impl StreamCreateOutcome {
    /// `AlreadyExists` counts as success: the stream is usable either way.
    pub fn is_success(&self) -> bool {
        !matches!(self, StreamCreateOutcome::Failed { .. })
    }
}

/// Lifecycle of a stream as seen by the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Requested,
    Created,
    Failed,
}

/// Content type used by the audio demo (16-bit linear PCM)
pub const CONTENT_TYPE_AUDIO_L16: &str = "audio/L16";
