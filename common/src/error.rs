use crate::protocol::MessageType;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to establish connection: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Failed to send {message_type:?} message: {reason}")]
    SendFailed {
        message_type: MessageType,
        reason: String,
    },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport closed")]
    Closed,
}

impl From<bincode::Error> for TransportError {
    fn from(err: bincode::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
