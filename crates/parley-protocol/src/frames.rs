//! Frame types for the Parley protocol.
//!
//! Every exchange between a session and the server is a frame. Frames are
//! serialized as MessagePack maps tagged by `type`.

use crate::event::ChatEvent;
use crate::request::Request;
use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Connect,
    Connected,
    Join,
    Leave,
    Request,
    Reply,
    Ack,
    Error,
    Event,
    Ping,
    Pong,
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame from a session: protocol version and session token.
    Connect {
        version: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Handshake accepted.
    Connected {
        session_id: String,
        actor_id: String,
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Enter a chat's room to receive its events.
    Join { id: u64, chat_id: String },

    /// Leave a chat's room.
    Leave { id: u64, chat_id: String },

    /// A message operation.
    Request { id: u64, request: Request },

    /// Successful result of a `Request`.
    Reply {
        id: u64,
        payload: serde_json::Value,
    },

    /// Acknowledgment of a `Join` or `Leave`.
    Ack { id: u64 },

    /// Failure of the frame with the given id (0 if not applicable).
    Error {
        id: u64,
        code: u16,
        message: String,
    },

    /// A lifecycle event for a room the session has joined.
    Event { event: ChatEvent },

    /// Keepalive ping.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
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
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Request { .. } => FrameType::Request,
            Frame::Reply { .. } => FrameType::Reply,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Event { .. } => FrameType::Event,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    #[must_use]
    pub fn connected(
        session_id: impl Into<String>,
        actor_id: impl Into<String>,
        version: u8,
        heartbeat: u32,
    ) -> Self {
        Frame::Connected {
            session_id: session_id.into(),
            actor_id: actor_id.into(),
            version,
            heartbeat,
        }
    }

    #[must_use]
    pub fn join(id: u64, chat_id: impl Into<String>) -> Self {
        Frame::Join {
            id,
            chat_id: chat_id.into(),
        }
    }

    #[must_use]
    pub fn leave(id: u64, chat_id: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            chat_id: chat_id.into(),
        }
    }

    #[must_use]
    pub fn request(id: u64, request: Request) -> Self {
        Frame::Request { id, request }
    }

    #[must_use]
    pub fn reply(id: u64, payload: serde_json::Value) -> Self {
        Frame::Reply { id, payload }
    }

    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn event(event: ChatEvent) -> Self {
        Frame::Event { event }
    }

    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}
