use crate::error::{Result, StreamError};
use crate::transport::MessageTransport;
use crate::types::{Chunk, DeviceIdentity, PendingRequest, PullOutcome, RequestKind};
use bytes::Bytes;
use common::{
    MessageType, ProtocolMessage, RegisterDeviceRequest, RegistrationAck, RegistrationOutcome,
    StreamCreateAck, StreamCreateOutcome, StreamCreateRequest, StreamDataChunk, StreamDataPush,
    StreamDataRequest, StreamState,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request/acknowledgement correlation for one named stream.
///
/// Holds at most one outstanding ack-awaiting request (registration, create
/// or pull) at a time. Pushes are fire-and-forget and only advance the push
/// counter once dispatched.
pub struct StreamChannel {
    identity: DeviceIdentity,
    transport: Arc<dyn MessageTransport>,
    stream_id: Option<String>,
    stream_state: Option<StreamState>,
    pending: Option<PendingRequest>,
    next_push_sequence: u64,
    next_pull_sequence: u64,
    exhausted: bool,
}

impl StreamChannel {
    pub fn new(identity: DeviceIdentity, transport: Arc<dyn MessageTransport>) -> Self {
        Self {
            identity,
            transport,
            stream_id: None,
            stream_state: None,
            pending: None,
            next_push_sequence: 0,
            next_pull_sequence: 0,
            exhausted: false,
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn stream_state(&self) -> Option<StreamState> {
        self.stream_state
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn next_push_sequence(&self) -> u64 {
        self.next_push_sequence
    }

    pub fn next_pull_sequence(&self) -> u64 {
        self.next_pull_sequence
    }

    /// True once the server answered a pull with an empty chunk
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Give up on the outstanding request so it can be issued again
    pub fn expire_pending(&mut self) -> Option<PendingRequest> {
        let expired = self.pending.take();
        if let Some(request) = &expired {
            debug!(
                "Abandoning {:?} after {:?}",
                request.kind,
                request.sent_at.elapsed()
            );
        }
        expired
    }

    pub async fn register_device(&mut self, specification_token: &str) -> Result<()> {
        self.ensure_idle()?;

        let body = RegisterDeviceRequest {
            hardware_id: self.identity.hardware_id.clone(),
            specification_token: specification_token.to_string(),
        };
        self.pending = Some(PendingRequest::new("", RequestKind::Register));
        if let Err(e) = self.send(MessageType::RegisterDevice, None, &body).await {
            self.pending = None;
            return Err(e);
        }

        info!("Registration sent for {}", self.identity.hardware_id);
        Ok(())
    }

    pub fn on_registration_acknowledged(
        &mut self,
        message: &ProtocolMessage,
    ) -> Result<RegistrationOutcome> {
        let ack: RegistrationAck = decode(message, MessageType::RegistrationAck)?;
        match self.pending.as_ref().map(|p| p.kind) {
            Some(RequestKind::Register) => self.pending = None,
            _ => {
                return Err(StreamError::InvalidState {
                    details: "no registration outstanding".to_string(),
                })
            }
        }

        match ack.outcome {
            RegistrationOutcome::Error { reason } => {
                warn!("Registration rejected: {}", reason);
                Err(StreamError::RegistrationFailure { reason })
            }
            outcome => {
                info!("Device registered: {:?}", outcome);
                Ok(outcome)
            }
        }
    }

    pub async fn create_stream(
        &mut self,
        originator: Option<String>,
        stream_id: &str,
        content_type: &str,
    ) -> Result<()> {
        self.ensure_idle()?;
        match (&self.stream_state, &self.stream_id) {
            (Some(StreamState::Failed), _) => {
                return Err(StreamError::InvalidState {
                    details: "stream has failed".to_string(),
                })
            }
            (Some(StreamState::Created), Some(current)) if current != stream_id => {
                return Err(StreamError::InvalidState {
                    details: format!("channel already bound to stream {}", current),
                })
            }
            _ => {}
        }

        let body = StreamCreateRequest {
            stream_id: stream_id.to_string(),
            content_type: content_type.to_string(),
        };
        self.stream_id = Some(stream_id.to_string());
        self.stream_state = Some(StreamState::Requested);
        self.pending = Some(PendingRequest::new(stream_id, RequestKind::Create));

        if let Err(e) = self.send(MessageType::StreamCreate, originator, &body).await {
            self.pending = None;
            return Err(e);
        }

        info!("Stream create sent: {} ({})", stream_id, content_type);
        Ok(())
    }

    /// Apply a stream create acknowledgement.
    ///
    /// `AlreadyExists` and `Created` both leave the stream ready; `Failed`
    /// marks it failed and surfaces the server's reason.
    pub fn on_create_acknowledged(
        &mut self,
        message: &ProtocolMessage,
    ) -> Result<StreamCreateOutcome> {
        let ack: StreamCreateAck = decode(message, MessageType::StreamCreateAck)?;

        let pending_stream = match &self.pending {
            Some(PendingRequest {
                kind: RequestKind::Create,
                stream_id,
                ..
            }) => stream_id.clone(),
            _ => {
                return Err(StreamError::InvalidState {
                    details: "no stream create outstanding".to_string(),
                })
            }
        };
        if ack.stream_id != pending_stream {
            return Err(StreamError::MalformedAcknowledgement {
                details: format!(
                    "acknowledgement for stream {} while creating {}",
                    ack.stream_id, pending_stream
                ),
            });
        }
        self.pending = None;

        match ack.outcome {
            StreamCreateOutcome::Failed { reason } => {
                self.stream_state = Some(StreamState::Failed);
                warn!("Stream {} rejected: {}", pending_stream, reason);
                Err(StreamError::StreamCreateFailure { reason })
            }
            outcome => {
                self.stream_state = Some(StreamState::Created);
                info!("✓ Stream {} ready ({:?})", pending_stream, outcome);
                Ok(outcome)
            }
        }
    }

    pub async fn push_chunk(
        &mut self,
        originator: Option<String>,
        sequence_number: u64,
        payload: Bytes,
    ) -> Result<()> {
        let stream_id = self.created_stream()?.to_string();
        if sequence_number != self.next_push_sequence {
            return Err(StreamError::InvalidSequence {
                expected: self.next_push_sequence,
                actual: sequence_number,
            });
        }

        let body = StreamDataPush {
            stream_id,
            sequence_number,
            data: payload.to_vec(),
        };
        self.send(MessageType::StreamData, originator, &body).await?;

        self.next_push_sequence += 1;
        debug!("Pushed chunk #{} ({} bytes)", sequence_number, payload.len());
        Ok(())
    }

    /// Ask for the chunk at `sequence_number`.
    ///
    /// Only the next unanswered sequence number may be requested. After a
    /// failed send or an expired request the same number is requested again.
    pub async fn request_chunk(&mut self, sequence_number: u64) -> Result<()> {
        let stream_id = self.created_stream()?.to_string();
        if let Some(PendingRequest {
            kind: RequestKind::Pull { sequence_number },
            ..
        }) = &self.pending
        {
            return Err(StreamError::RequestOutstanding {
                sequence_number: *sequence_number,
            });
        }
        self.ensure_idle()?;
        if self.exhausted {
            return Err(StreamError::InvalidState {
                details: "stream exhausted".to_string(),
            });
        }
        if sequence_number != self.next_pull_sequence {
            return Err(StreamError::InvalidSequence {
                expected: self.next_pull_sequence,
                actual: sequence_number,
            });
        }

        let body = StreamDataRequest {
            stream_id: stream_id.clone(),
            sequence_number,
        };
        self.pending = Some(PendingRequest::new(
            stream_id,
            RequestKind::Pull { sequence_number },
        ));
        if let Err(e) = self.send(MessageType::StreamDataRequest, None, &body).await {
            self.pending = None;
            return Err(e);
        }

        debug!("Requested chunk #{}", sequence_number);
        Ok(())
    }

    /// Match a pull response against the outstanding request.
    ///
    /// A response counts only if it names the stream and sequence number of
    /// the pending pull. Anything else (a redelivery, or a late answer to an
    /// expired request) is reported as `Unsolicited`.
    pub fn on_chunk_received(&mut self, message: &ProtocolMessage) -> Result<PullOutcome> {
        let response: StreamDataChunk = decode(message, MessageType::StreamDataChunk)?;

        let sequence_number = match &self.pending {
            Some(PendingRequest {
                kind: RequestKind::Pull { sequence_number },
                stream_id,
                ..
            }) if *stream_id == response.stream_id
                && *sequence_number == response.sequence_number =>
            {
                *sequence_number
            }
            _ => {
                debug!(
                    "Dropping unsolicited chunk #{} for stream {} ({} bytes)",
                    response.sequence_number,
                    response.stream_id,
                    response.data.len()
                );
                return Ok(PullOutcome::Unsolicited);
            }
        };
        self.pending = None;

        if response.is_end_of_stream() {
            self.exhausted = true;
            info!("Stream exhausted at chunk #{}", sequence_number);
            return Ok(PullOutcome::EndOfStream);
        }

        self.next_pull_sequence += 1;
        debug!(
            "Received chunk #{} ({} bytes)",
            sequence_number,
            response.data.len()
        );
        Ok(PullOutcome::Chunk(Chunk::new(sequence_number, response.data)))
    }

    fn created_stream(&self) -> Result<&str> {
        match (&self.stream_state, &self.stream_id) {
            (Some(StreamState::Created), Some(stream_id)) => Ok(stream_id),
            (state, _) => Err(StreamError::InvalidState {
                details: format!("stream not created (state {:?})", state),
            }),
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.pending {
            None => Ok(()),
            Some(request) => Err(StreamError::InvalidState {
                details: format!("{:?} request still outstanding", request.kind),
            }),
        }
    }

    async fn send<T: serde::Serialize>(
        &self,
        message_type: MessageType,
        originator: Option<String>,
        body: &T,
    ) -> Result<()> {
        let message =
            ProtocolMessage::new(message_type, self.identity.hardware_id.clone(), originator, body)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(message: &ProtocolMessage, expected: MessageType) -> Result<T> {
    if message.message_type != expected {
        return Err(StreamError::MalformedAcknowledgement {
            details: format!("expected {:?}, got {:?}", expected, message.message_type),
        });
    }
    message
        .body()
        .map_err(|e| StreamError::MalformedAcknowledgement {
            details: format!("{:?}: {}", expected, e),
        })
}
