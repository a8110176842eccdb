//! Frame types for the Uplink protocol.
//!
//! A frame is the unit of exchange on the connection. Topic payloads are
//! opaque byte strings; the core never interprets them.

use serde::{Deserialize, Serialize};

/// Well-known server error codes.
pub mod codes {
    /// Credential rejected during the connect handshake.
    pub const AUTH_REJECTED: u16 = 4401;
    /// Topic failed server-side validation.
    pub const INVALID_TOPIC: u16 = 4400;
    /// Server is shutting down and will drop the connection.
    pub const GOING_AWAY: u16 = 4500;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Subscribe = 0x03,
    Unsubscribe = 0x04,
    Publish = 0x05,
    Ack = 0x06,
    Error = 0x07,
    Ping = 0x08,
    Pong = 0x09,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Subscribe),
            0x04 => Ok(FrameType::Unsubscribe),
            0x05 => Ok(FrameType::Publish),
            0x06 => Ok(FrameType::Ack),
            0x07 => Ok(FrameType::Error),
            0x08 => Ok(FrameType::Ping),
            0x09 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Client handshake. Sent first on every new transport connection;
    /// the server has no memory of prior sessions.
    #[serde(rename = "connect")]
    Connect {
        /// Client protocol major version.
        version: u8,
        /// Bearer token, re-read from the credential provider per attempt.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Server accepted the handshake.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Subscribe to a topic.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Topic to subscribe to.
        topic: String,
    },

    /// Unsubscribe from a topic.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID for acknowledgment.
        id: u64,
        /// Topic to unsubscribe from.
        topic: String,
    },

    /// A topic message, in either direction: server push or client emit.
    #[serde(rename = "publish")]
    Publish {
        /// Optional request ID when the sender wants an acknowledgment.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Target topic.
        topic: String,
        /// Optional event name qualifying the payload.
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        /// Opaque payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not tied to a request).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Publish { .. } => FrameType::Publish,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Subscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, topic: impl Into<String>) -> Self {
        Frame::Unsubscribe {
            id,
            topic: topic.into(),
        }
    }

    /// Create a fire-and-forget Publish frame.
    #[must_use]
    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Publish {
            id: None,
            topic: topic.into(),
            event: None,
            payload: payload.into(),
        }
    }

    /// Create a Publish frame that requests an acknowledgment.
    #[must_use]
    pub fn publish_with_ack(
        id: u64,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Frame::Publish {
            id: Some(id),
            topic: topic.into(),
            event: None,
            payload: payload.into(),
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping(timestamp: Option<u64>) -> Self {
        Frame::Ping { timestamp }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
