//! Secure tunneling wire messages and frame codec.
//!
//! # Frame Format
//!
//! Each frame on the tunnel WebSocket consists of:
//! - 2 bytes: message length (big-endian)
//! - N bytes: protobuf-encoded [`TunnelMessage`]
//!
//! Frames may be split across or packed into WebSocket messages, so the
//! receiving side buffers bytes in a [`FrameDecoder`].
//!
//! # Protocol Versions
//!
//! V1, V2 and V3 share one message layout; later versions only add fields
//! (`service_id` and `available_service_ids` in V2, `connection_id` in V3).
//! Unset fields are not encoded, so a single message type serves all three.

use prost::Message;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 2;

/// Largest message body the length prefix can describe.
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Largest payload carried by one DATA message.
pub const MAX_PAYLOAD_SIZE: usize = 63 * 1024;

/// Tunnel message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Unknown = 0,
    Data = 1,
    StreamStart = 2,
    /// Called STREAM_END in V1.
    StreamReset = 3,
    SessionReset = 4,
    ServiceIds = 5,
    ConnectionStart = 6,
    ConnectionReset = 7,
}

/// One secure tunneling protocol message.
#[derive(Clone, PartialEq, Message)]
pub struct TunnelMessage {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "2")]
    pub stream_id: i32,
    #[prost(bool, tag = "3")]
    pub ignorable: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "5")]
    pub service_id: String,
    #[prost(string, repeated, tag = "6")]
    pub available_service_ids: Vec<String>,
    #[prost(uint32, tag = "7")]
    pub connection_id: u32,
}

impl TunnelMessage {
    fn of_type(message_type: MessageType, stream_id: i32) -> Self {
        Self {
            r#type: message_type as i32,
            stream_id,
            ..Default::default()
        }
    }

    /// A DATA message carrying `payload` on `stream_id`.
    pub fn data(stream_id: i32, payload: Vec<u8>) -> Self {
        Self {
            payload,
            ..Self::of_type(MessageType::Data, stream_id)
        }
    }

    /// A STREAM_START message, optionally naming the target service.
    pub fn stream_start(stream_id: i32, service_id: Option<&str>) -> Self {
        Self {
            service_id: service_id.unwrap_or_default().to_string(),
            ..Self::of_type(MessageType::StreamStart, stream_id)
        }
    }

    /// A STREAM_RESET message for `stream_id`.
    pub fn stream_reset(stream_id: i32) -> Self {
        Self::of_type(MessageType::StreamReset, stream_id)
    }

    /// A SERVICE_IDS message announcing the given services.
    pub fn service_ids(ids: Vec<String>) -> Self {
        Self {
            available_service_ids: ids,
            ..Self::of_type(MessageType::ServiceIds, 0)
        }
    }

    /// Returns the message kind, `Unknown` for values this side does not know.
    pub fn message_type(&self) -> MessageType {
        MessageType::try_from(self.r#type).unwrap_or(MessageType::Unknown)
    }

    /// Encodes the message as one length-prefixed frame.
    pub fn encode_frame(&self) -> Result<Vec<u8>> {
        let len = self.encoded_len();
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: FRAME_HEADER_SIZE + len,
                max: FRAME_HEADER_SIZE + MAX_MESSAGE_SIZE,
            });
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + len);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
        frame.extend_from_slice(&self.encode_to_vec());
        Ok(frame)
    }
}

/// Secure tunneling protocol version, negotiated as a WebSocket subprotocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V1,
    #[default]
    V2,
    V3,
}

impl ProtocolVersion {
    /// Returns the WebSocket subprotocol name, e.g. `aws.iot.securetunneling-2.0`.
    pub fn subprotocol(self) -> &'static str {
        match self {
            ProtocolVersion::V1 => "aws.iot.securetunneling-1.0",
            ProtocolVersion::V2 => "aws.iot.securetunneling-2.0",
            ProtocolVersion::V3 => "aws.iot.securetunneling-3.0",
        }
    }

    /// Returns true if DATA messages carry the service id.
    pub fn supports_service_ids(self) -> bool {
        self != ProtocolVersion::V1
    }

    /// Returns true if messages carry a connection id.
    pub fn supports_connections(self) -> bool {
        self == ProtocolVersion::V3
    }
}

/// Reassembles frames from arbitrarily split input.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete frame, `Ok(None)` if more bytes are needed.
    ///
    /// A frame whose body fails to decode is consumed before the error is
    /// returned, so decoding can continue with the next frame.
    pub fn next_message(&mut self) -> Result<Option<TunnelMessage>> {
        let Some(header) = self.buffer.get(..FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let len = u16::from_be_bytes([header[0], header[1]]) as usize;
        if self.buffer.len() < FRAME_HEADER_SIZE + len {
            return Ok(None);
        }

        let frame: Vec<u8> = self.buffer.drain(..FRAME_HEADER_SIZE + len).collect();
        let message = TunnelMessage::decode(&frame[FRAME_HEADER_SIZE..])?;
        Ok(Some(message))
    }
}
