//! Message persistence port.
//!
//! The store is the single source of truth for message records and the only
//! component that mutates them. Implementations must apply each
//! [`MessagePatch`] as one atomic step under the record's lock, so that
//! concurrent patches to the same message never lose each other's changes.

use crate::message::{ActorId, ChatId, EditRecord, Message, MessageId, NewMessage, Page};
use async_trait::async_trait;
use thiserror::Error;

/// Largest page a store will return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// The record exists but has been soft-deleted.
    #[error("Message deleted: {0}")]
    Tombstoned(MessageId),

    /// Insert collided with an existing id.
    #[error("Duplicate message id: {0}")]
    Duplicate(MessageId),

    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Change to a reaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionChange {
    /// Set or replace the actor's reaction.
    Set { actor: ActorId, emoji: String },
    /// Remove the actor's reaction, if any.
    Clear { actor: ActorId },
}

/// A partial update to one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    /// New content; the old content is appended to the edit history.
    pub content: Option<String>,
    pub edited_at: Option<u64>,
    /// Soft-delete the message at this time.
    pub deleted_at: Option<u64>,
    pub reaction: Option<ReactionChange>,
    /// Add this actor to `read_by`.
    pub read_by: Option<ActorId>,
}

impl MessagePatch {
    #[must_use]
    pub fn edit(content: impl Into<String>, at: u64) -> Self {
        Self {
            content: Some(content.into()),
            edited_at: Some(at),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn delete(at: u64) -> Self {
        Self {
            deleted_at: Some(at),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mark_read(actor: impl Into<ActorId>) -> Self {
        Self {
            read_by: Some(actor.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn react(actor: impl Into<ActorId>, emoji: impl Into<String>) -> Self {
        Self {
            reaction: Some(ReactionChange::Set {
                actor: actor.into(),
                emoji: emoji.into(),
            }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn unreact(actor: impl Into<ActorId>) -> Self {
        Self {
            reaction: Some(ReactionChange::Clear {
                actor: actor.into(),
            }),
            ..Self::default()
        }
    }

    /// Apply the patch to a live record in place.
    ///
    /// Returns `true` if any field changed. Deleting drops the content and
    /// the edit history.
    pub fn apply(self, message: &mut Message) -> bool {
        let mut changed = false;

        if let Some(content) = self.content {
            if content != message.content {
                let old = std::mem::replace(&mut message.content, content);
                message.edits.push(EditRecord {
                    content: old,
                    replaced_at: self.edited_at.unwrap_or(message.created_at),
                });
                changed = true;
            }
        }
        if let Some(at) = self.edited_at {
            message.edited_at = Some(at);
            changed = true;
        }
        match self.reaction {
            Some(ReactionChange::Set { actor, emoji }) => {
                let previous = message.reactions.insert(actor, emoji.clone());
                changed |= previous.as_deref() != Some(emoji.as_str());
            }
            Some(ReactionChange::Clear { actor }) => {
                changed |= message.reactions.remove(&actor).is_some();
            }
            None => {}
        }
        if let Some(actor) = self.read_by {
            changed |= message.read_by.insert(actor);
        }
        if let Some(at) = self.deleted_at {
            message.deleted_at = Some(at);
            message.content.clear();
            message.edits.clear();
            changed = true;
        }

        changed
    }
}

/// Port for message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store a new message, assigning its id and creation timestamp.
    ///
    /// Creation timestamps never decrease from one insert to the next.
    async fn insert(&self, message: NewMessage) -> StoreResult<Message>;

    /// Fetch a message by id, tombstones included.
    async fn find_by_id(&self, id: MessageId) -> StoreResult<Message>;

    /// Live messages of a chat, newest first.
    ///
    /// `page` is clamped to at least 1 and `page_size` to `1..=MAX_PAGE_SIZE`.
    /// Pages past the end are empty.
    async fn list_by_chat(&self, chat_id: &str, page: u32, page_size: u32)
        -> StoreResult<Page<Message>>;

    /// Apply a patch atomically and return the updated record.
    ///
    /// Fails with `NotFound` for unknown ids and `Tombstoned` for deleted
    /// messages.
    async fn update(&self, id: MessageId, patch: MessagePatch) -> StoreResult<Message>;

    /// Case-insensitive substring search over live content, newest first.
    async fn search_in_chat(
        &self,
        chat_id: &str,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<Message>>;

    /// Count live messages in `chats` that `actor` did not send and has not read.
    async fn count_unread(&self, actor: &str, chats: &[ChatId]) -> StoreResult<u64>;

    /// Mark every live message in a chat not sent by `actor` as read.
    ///
    /// Returns the number of messages that changed.
    async fn mark_chat_read(&self, chat_id: &str, actor: &str) -> StoreResult<u64>;
}

/// Clamp pagination arguments to the store contract.
#[must_use]
pub fn clamp_page(page: u32, page_size: u32) -> (u32, u32) {
    (page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn message() -> Message {
        NewMessage {
            chat_id: "c1".into(),
            sender_id: "alice".into(),
            content: "first".into(),
            kind: MessageKind::Text,
            attachments: vec![],
            reply_to: None,
        }
        .into_message(1, 100)
    }

    #[test]
    fn test_edit_keeps_history() {
        let mut msg = message();
        assert!(MessagePatch::edit("second", 200).apply(&mut msg));
        assert!(MessagePatch::edit("third", 300).apply(&mut msg));

        assert_eq!(msg.content, "third");
        assert_eq!(msg.edited_at, Some(300));
        let history: Vec<_> = msg.edits.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(history, ["first", "second"]);
    }

    #[test]
    fn test_reaction_replaces() {
        let mut msg = message();
        assert!(MessagePatch::react("bob", "👍").apply(&mut msg));
        assert!(MessagePatch::react("bob", "🎉").apply(&mut msg));
        assert!(!MessagePatch::react("bob", "🎉").apply(&mut msg));

        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions["bob"], "🎉");

        assert!(MessagePatch::unreact("bob").apply(&mut msg));
        assert!(!MessagePatch::unreact("bob").apply(&mut msg));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn test_mark_read_idempotent() {
        let mut msg = message();
        assert!(MessagePatch::mark_read("bob").apply(&mut msg));
        assert!(!MessagePatch::mark_read("bob").apply(&mut msg));
        assert_eq!(msg.read_by.len(), 1);
    }

    #[test]
    fn test_delete_tombstones_content() {
        let mut msg = message();
        MessagePatch::edit("second", 200).apply(&mut msg);
        assert!(MessagePatch::delete(300).apply(&mut msg));

        assert!(msg.is_deleted());
        assert!(msg.content.is_empty());
        assert!(msg.edits.is_empty());
    }

    #[test]
    fn test_clamp_page() {
        assert_eq!(clamp_page(0, 0), (1, 1));
        assert_eq!(clamp_page(3, 500), (3, MAX_PAGE_SIZE));
    }
}
