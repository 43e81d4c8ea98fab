//! Message lifecycle events delivered to room members.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of lifecycle change an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "message:new")]
    Created,
    #[serde(rename = "message:edited")]
    Edited,
    #[serde(rename = "message:deleted")]
    Deleted,
    #[serde(rename = "message:reaction")]
    Reaction,
    #[serde(rename = "message:read")]
    Read,
}

impl EventKind {
    /// The event name as seen on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "message:new",
            EventKind::Edited => "message:edited",
            EventKind::Deleted => "message:deleted",
            EventKind::Reaction => "message:reaction",
            EventKind::Read => "message:read",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event for a single message.
///
/// `sender_id` is the actor whose operation caused the event. `content`
/// is the message body for `Created`/`Edited`, the emoji for `Reaction`
/// (null when a reaction is removed), and always null for `Deleted` and
/// `Read`. `sender_name` is the sender's display name, set on `Created`
/// events when the session has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub event_type: EventKind,
    pub chat_id: String,
    pub message_id: u64,
    pub sender_id: String,
    pub content: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl ChatEvent {
    /// Create an event without content.
    #[must_use]
    pub fn new(
        event_type: EventKind,
        chat_id: impl Into<String>,
        message_id: u64,
        sender_id: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            event_type,
            chat_id: chat_id.into(),
            message_id,
            sender_id: sender_id.into(),
            content: None,
            timestamp,
            sender_name: None,
        }
    }

    /// Attach content to the event.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Attach the sender's display name.
    #[must_use]
    pub fn with_sender_name(mut self, name: Option<String>) -> Self {
        self.sender_name = name;
        self
    }
}
