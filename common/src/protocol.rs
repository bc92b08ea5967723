use crate::error::{Result, TransportError};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Upper bound for a single encoded message on the wire
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Message type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    RegisterDevice = 0x01,
    RegistrationAck = 0x02,
    StreamCreate = 0x10,
    StreamCreateAck = 0x11,
    /// Device pushes a chunk to the stream
    StreamData = 0x12,
    /// Device asks for the chunk at a sequence number
    StreamDataRequest = 0x13,
    /// Server answers a `StreamDataRequest`
    StreamDataChunk = 0x14,
}

/// Envelope for every message exchanged with the platform.
///
/// `payload` holds the bincode encoding of the body that matches
/// `message_type` (see [`ProtocolMessage::body`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub message_type: MessageType,
    pub device_id: String,
    /// Identifier of the originating event, used to correlate command acks
    pub originator: Option<String>,
    pub timestamp: SystemTime,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    pub fn new<T: Serialize>(
        message_type: MessageType,
        device_id: impl Into<String>,
        originator: Option<String>,
        body: &T,
    ) -> Result<Self> {
        Ok(Self {
            message_type,
            device_id: device_id.into(),
            originator,
            timestamp: SystemTime::now(),
            payload: bincode::serialize(body)?,
        })
    }

    /// Decode the typed body carried in `payload`
    pub fn body<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(TransportError::Serialization(format!(
                "message of {} bytes exceeds limit of {}",
                bytes.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Device registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceRequest {
    pub hardware_id: String,
    pub specification_token: String,
}

/// Device registration acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationAck {
    pub outcome: RegistrationOutcome,
}

/// Stream create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCreateRequest {
    pub stream_id: String,
    pub content_type: String,
}

/// Stream create acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCreateAck {
    pub stream_id: String,
    pub outcome: StreamCreateOutcome,
}

/// Chunk pushed by the device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDataPush {
    pub stream_id: String,
    pub sequence_number: u64,
    pub data: Vec<u8>,
}

/// Pull request for a single chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDataRequest {
    pub stream_id: String,
    pub sequence_number: u64,
}

/// Pull response. Empty `data` marks the end of the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDataChunk {
    pub stream_id: String,
    /// Sequence number of the request being answered
    pub sequence_number: u64,
    pub data: Vec<u8>,
}

impl StreamDataChunk {
    pub fn is_end_of_stream(&self) -> bool {
        self.data.is_empty()
    }
}
