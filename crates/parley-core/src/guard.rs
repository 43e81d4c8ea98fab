//! Chat membership lookup and authorization decisions.
//!
//! Membership belongs to the surrounding application; this module only
//! consumes it through [`ChatDirectory`]. The [`AuthorizationGuard`] turns
//! membership and ownership into yes/no answers and never fails: a
//! directory error is logged and answered with `false`.

use crate::message::{ActorId, ChatId, Message};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Directory lookup failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Chat membership lookup.
#[async_trait]
pub trait ChatDirectory: Send + Sync {
    /// Whether `actor` participates in `chat_id`.
    async fn is_participant(&self, chat_id: &str, actor: &str) -> Result<bool, DirectoryError>;

    /// All chats `actor` participates in.
    async fn chats_for(&self, actor: &str) -> Result<Vec<ChatId>, DirectoryError>;
}

/// A directory held in memory, seeded by configuration or tests.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    chats: DashMap<ChatId, BTreeSet<ActorId>>,
}

impl MemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a chat with the given participants.
    pub fn set_chat<I, S>(&self, chat_id: impl Into<ChatId>, participants: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<ActorId>,
    {
        let chat_id = chat_id.into();
        let members: BTreeSet<ActorId> = participants.into_iter().map(Into::into).collect();
        debug!(chat = %chat_id, participants = members.len(), "Registered chat");
        self.chats.insert(chat_id, members);
    }

    /// Add a participant. Returns `false` if already present.
    pub fn add_participant(&self, chat_id: &str, actor: impl Into<ActorId>) -> bool {
        self.chats
            .entry(chat_id.to_string())
            .or_default()
            .insert(actor.into())
    }

    /// Remove a participant. Returns `false` if absent.
    pub fn remove_participant(&self, chat_id: &str, actor: &str) -> bool {
        self.chats
            .get_mut(chat_id)
            .is_some_and(|mut members| members.remove(actor))
    }

    /// Number of registered chats.
    #[must_use]
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }
}

#[async_trait]
impl ChatDirectory for MemoryDirectory {
    async fn is_participant(&self, chat_id: &str, actor: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .chats
            .get(chat_id)
            .is_some_and(|members| members.contains(actor)))
    }

    async fn chats_for(&self, actor: &str) -> Result<Vec<ChatId>, DirectoryError> {
        Ok(self
            .chats
            .iter()
            .filter(|entry| entry.value().contains(actor))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Authorization decisions for chats and messages.
#[async_trait]
pub trait AuthorizationGuard: Send + Sync {
    /// Whether `actor` may read, react to, and mark messages in `chat_id`.
    async fn can_read(&self, actor: &str, chat_id: &str) -> bool;

    /// Whether `actor` may edit or delete `message`.
    fn can_modify(&self, actor: &str, message: &Message) -> bool;
}

/// Guard backed by a [`ChatDirectory`]: read access is membership,
/// modification is authorship.
pub struct MembershipGuard {
    directory: Arc<dyn ChatDirectory>,
}

impl MembershipGuard {
    #[must_use]
    pub fn new(directory: Arc<dyn ChatDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl AuthorizationGuard for MembershipGuard {
    async fn can_read(&self, actor: &str, chat_id: &str) -> bool {
        match self.directory.is_participant(chat_id, actor).await {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(chat = %chat_id, actor = %actor, error = %e, "Membership lookup failed");
                false
            }
        }
    }

    fn can_modify(&self, actor: &str, message: &Message) -> bool {
        message.sender_id == actor
    }
}
