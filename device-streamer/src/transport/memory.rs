use super::MessageTransport;
use async_trait::async_trait;
use common::{MessageType, ProtocolMessage, TransportError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// In-process transport.
///
/// Every dispatched message is forwarded to the paired receiver, so a test
/// (or an embedded server) can observe it and answer through the inbound
/// sender it owns.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
    failures: Mutex<HashMap<MessageType, u32>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProtocolMessage>) {
        let (outbound, sent) = mpsc::unbounded_channel();
        let transport = Self {
            outbound,
            failures: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        };
        (transport, sent)
    }

    /// Make the next `count` sends of `message_type` fail
    pub fn fail_next(&self, message_type: MessageType, count: u32) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures.entry(message_type).or_insert(0) += count;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn take_failure(&self, message_type: MessageType) -> bool {
        let Ok(mut failures) = self.failures.lock() else {
            return false;
        };
        match failures.get_mut(&message_type) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl MessageTransport for MemoryTransport {
    async fn send(&self, message: ProtocolMessage) -> common::Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let message_type = message.message_type;
        if self.take_failure(message_type) {
            return Err(TransportError::SendFailed {
                message_type,
                reason: "injected failure".to_string(),
            });
        }

        self.outbound
            .send(message)
            .map_err(|_| TransportError::SendFailed {
                message_type,
                reason: "peer dropped".to_string(),
            })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StreamDataRequest;

    fn pull(seq: u64) -> ProtocolMessage {
        let body = StreamDataRequest {
            stream_id: "abc".to_string(),
            sequence_number: seq,
        };
        ProtocolMessage::new(MessageType::StreamDataRequest, "device_001", None, &body).unwrap()
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let (transport, mut sent) = MemoryTransport::new();
        transport.fail_next(MessageType::StreamDataRequest, 1);

        assert!(matches!(
            transport.send(pull(0)).await,
            Err(TransportError::SendFailed { .. })
        ));
        transport.send(pull(0)).await.unwrap();

        let delivered = sent.recv().await.unwrap();
        assert_eq!(delivered.message_type, MessageType::StreamDataRequest);
        assert!(sent.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (transport, _sent) = MemoryTransport::new();
        transport.close().await;
        assert!(matches!(transport.send(pull(0)).await, Err(TransportError::Closed)));
    }
}
