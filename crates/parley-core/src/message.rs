//! Message records and the types that describe them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Store-assigned message identifier. Never reused.
pub type MessageId = u64;

/// Chat identifier, owned by the chat directory.
pub type ChatId = String;

/// Opaque actor identifier resolved from an authenticated session.
pub type ActorId = String;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The kind of a message, fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    Attachment,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
            MessageKind::Attachment => "attachment",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unknown message kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown message kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            "attachment" => Ok(MessageKind::Attachment),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Content replaced by an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditRecord {
    /// The content before the edit.
    pub content: String,
    /// When it was replaced.
    pub replaced_at: u64,
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: ActorId,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<String>,
    pub reply_to: Option<MessageId>,
    /// One emoji per actor.
    pub reactions: BTreeMap<ActorId, String>,
    pub read_by: BTreeSet<ActorId>,
    pub created_at: u64,
    pub edited_at: Option<u64>,
    pub deleted_at: Option<u64>,
    /// Oldest edit first. Not part of the wire representation.
    #[serde(skip)]
    pub edits: Vec<EditRecord>,
}

impl Message {
    /// Whether the message has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether `actor` counts this message as unread.
    #[must_use]
    pub fn is_unread_by(&self, actor: &str) -> bool {
        !self.is_deleted() && self.sender_id != actor && !self.read_by.contains(actor)
    }
}

/// A message about to be stored; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: ActorId,
    pub content: String,
    pub kind: MessageKind,
    pub attachments: Vec<String>,
    pub reply_to: Option<MessageId>,
}

impl NewMessage {
    /// Build the stored record.
    #[must_use]
    pub fn into_message(self, id: MessageId, created_at: u64) -> Message {
        Message {
            id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            kind: self.kind,
            attachments: self.attachments,
            reply_to: self.reply_to,
            reactions: BTreeMap::new(),
            read_by: BTreeSet::new(),
            created_at,
            edited_at: None,
            deleted_at: None,
            edits: Vec::new(),
        }
    }
}

/// Marker returned when a message is soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub deleted_at: u64,
}

/// One page of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    /// Whether a further page has at least one item.
    pub has_more: bool,
}
