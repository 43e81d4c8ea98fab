//! Message operations a session can request.
//!
//! The acting identity is never part of a request; the server takes it from
//! the authenticated session.

use serde::{Deserialize, Serialize};

/// Default history page size.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Default search page size.
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 20;

fn default_page() -> u32 {
    1
}

fn default_history_page_size() -> u32 {
    DEFAULT_HISTORY_PAGE_SIZE
}

fn default_search_page_size() -> u32 {
    DEFAULT_SEARCH_PAGE_SIZE
}

/// A request frame body, tagged by `op`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Send a new message to a chat.
    Send {
        chat_id: String,
        content: String,
        /// `text`, `system` or `attachment`; `text` when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<u64>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },

    /// Fetch a page of chat history, newest first.
    History {
        chat_id: String,
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default = "default_history_page_size")]
        page_size: u32,
    },

    /// Replace the content of one's own message.
    Edit { message_id: u64, content: String },

    /// Soft-delete one's own message.
    Delete { message_id: u64 },

    /// Mark a single message as read.
    MarkRead { message_id: u64 },

    /// Mark every message in a chat as read.
    MarkChatRead { chat_id: String },

    /// Set or replace one's reaction on a message.
    React { message_id: u64, emoji: String },

    /// Remove one's reaction from a message.
    Unreact { message_id: u64 },

    /// Search a chat's messages.
    Search {
        chat_id: String,
        query: String,
        #[serde(default = "default_page")]
        page: u32,
        #[serde(default = "default_search_page_size")]
        page_size: u32,
    },

    /// Count unread messages across all of the actor's chats.
    UnreadCount,

    /// Fetch the edit history of a message.
    EditHistory { message_id: u64 },
}

impl Request {
    /// Operation name, used for logging and metrics labels.
    #[must_use]
    pub fn op(&self) -> &'static str {
        match self {
            Request::Send { .. } => "send",
            Request::History { .. } => "history",
            Request::Edit { .. } => "edit",
            Request::Delete { .. } => "delete",
            Request::MarkRead { .. } => "mark_read",
            Request::MarkChatRead { .. } => "mark_chat_read",
            Request::React { .. } => "react",
            Request::Unreact { .. } => "unreact",
            Request::Search { .. } => "search",
            Request::UnreadCount => "unread_count",
            Request::EditHistory { .. } => "edit_history",
        }
    }

    /// Build a plain text `Send` request.
    #[must_use]
    pub fn send(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Request::Send {
            chat_id: chat_id.into(),
            content: content.into(),
            kind: None,
            reply_to: None,
            attachments: Vec::new(),
        }
    }
}
