use crate::device::DeviceManager;
use crate::streams::StreamStore;
use anyhow::Result;
use common::{
    MessageType, ProtocolMessage, RegisterDeviceRequest, RegistrationAck, StreamCreateAck,
    StreamCreateOutcome, StreamCreateRequest, StreamDataChunk, StreamDataPush, StreamDataRequest,
    MAX_MESSAGE_SIZE,
};
use quinn::Connection;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Serve one device connection until it closes.
///
/// Streams are read one at a time so messages are handled in the order
/// the device opened them.
pub async fn handle_connection(
    connection: Connection,
    devices: DeviceManager,
    streams: StreamStore,
) -> Result<()> {
    let remote = connection.remote_address();
    let mut seen_devices = HashSet::new();

    loop {
        let mut recv = match connection.accept_uni().await {
            Ok(recv) => recv,
            Err(e) => {
                info!("Connection {} closed: {}", remote, e);
                break;
            }
        };

        let buf = match recv.read_to_end(MAX_MESSAGE_SIZE).await {
            Ok(buf) => buf,
            Err(e) => {
                error!("Failed to read message: {}", e);
                continue;
            }
        };

        let msg = match ProtocolMessage::decode(&buf) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Failed to decode message from {}: {}", remote, e);
                continue;
            }
        };
        debug!("Received {:?} from {}", msg.message_type, msg.device_id);
        seen_devices.insert(msg.device_id.clone());

        let Some(reply) = handle_message(&devices, &streams, &msg) else {
            continue;
        };

        if let Err(e) = send_reply(&connection, &reply).await {
            warn!("Failed to send {:?} to {}: {}", reply.message_type, remote, e);
        }
    }

    for device_id in seen_devices {
        let removed = streams.remove_device_streams(&device_id);
        if removed > 0 {
            info!("Released {} streams of {}", removed, device_id);
        }
    }
    Ok(())
}

async fn send_reply(connection: &Connection, reply: &ProtocolMessage) -> Result<()> {
    let data = reply.encode()?;
    let mut send = connection.open_uni().await?;
    send.write_all(&data).await?;
    send.finish().await?;
    Ok(())
}

/// Apply one device message and build the reply, if the message expects one
pub fn handle_message(
    devices: &DeviceManager,
    streams: &StreamStore,
    msg: &ProtocolMessage,
) -> Option<ProtocolMessage> {
    let device_id = msg.device_id.as_str();
    let reply = match msg.message_type {
        MessageType::RegisterDevice => {
            let request: RegisterDeviceRequest = decode_or_log(msg)?;
            let outcome = devices.register(&request.hardware_id, &request.specification_token);
            debug!("{} devices registered", devices.device_count());
            ProtocolMessage::new(
                MessageType::RegistrationAck,
                device_id,
                msg.originator.clone(),
                &RegistrationAck { outcome },
            )
        }
        MessageType::StreamCreate => {
            let request: StreamCreateRequest = decode_or_log(msg)?;
            if devices.get_device(device_id).is_none() {
                debug!("Stream create from unregistered device {}", device_id);
            }
            let outcome = if request.stream_id.is_empty() {
                StreamCreateOutcome::Failed {
                    reason: "empty stream id".to_string(),
                }
            } else {
                streams.create(device_id, &request.stream_id, &request.content_type)
            };
            ProtocolMessage::new(
                MessageType::StreamCreateAck,
                device_id,
                msg.originator.clone(),
                &StreamCreateAck {
                    stream_id: request.stream_id,
                    outcome,
                },
            )
        }
        MessageType::StreamData => {
            let push: StreamDataPush = decode_or_log(msg)?;
            match streams.append(device_id, &push.stream_id, push.sequence_number, push.data) {
                Ok(()) => debug!(
                    "Stored chunk {} of {} ({} held)",
                    push.sequence_number,
                    push.stream_id,
                    streams.chunk_count(&push.stream_id)
                ),
                Err(e) => warn!(
                    "Dropped chunk {} of {}: {}",
                    push.sequence_number, push.stream_id, e
                ),
            }
            return None;
        }
        MessageType::StreamDataRequest => {
            let request: StreamDataRequest = decode_or_log(msg)?;
            let data = match streams.chunk(&request.stream_id, request.sequence_number) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Pull of {} answered empty: {}", request.stream_id, e);
                    Vec::new()
                }
            };
            ProtocolMessage::new(
                MessageType::StreamDataChunk,
                device_id,
                msg.originator.clone(),
                &StreamDataChunk {
                    stream_id: request.stream_id,
                    sequence_number: request.sequence_number,
                    data,
                },
            )
        }
        MessageType::RegistrationAck
        | MessageType::StreamCreateAck
        | MessageType::StreamDataChunk => {
            debug!("Ignoring server-bound {:?}", msg.message_type);
            return None;
        }
    };

    match reply {
        Ok(reply) => Some(reply),
        Err(e) => {
            error!("Failed to encode reply: {}", e);
            None
        }
    }
}

fn decode_or_log<T: serde::de::DeserializeOwned>(msg: &ProtocolMessage) -> Option<T> {
    match msg.body() {
        Ok(body) => Some(body),
        Err(e) => {
            warn!("Malformed {:?} body: {}", msg.message_type, e);
            None
        }
    }
}
