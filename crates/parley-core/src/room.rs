//! Chat rooms for live fan-out.
//!
//! A room is the set of sessions currently viewing one chat. Events are
//! delivered over a bounded broadcast channel; a session that falls behind
//! loses the oldest events and is expected to refetch history.

use parley_protocol::ChatEvent;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Maximum chat id length.
pub const MAX_CHAT_ID_LENGTH: usize = 256;

/// Default per-room event buffer.
pub const DEFAULT_ROOM_CAPACITY: usize = 256;

/// Validate a chat id.
///
/// # Errors
///
/// Returns a reason if the id is empty, too long, or contains control
/// characters.
pub fn validate_chat_id(chat_id: &str) -> Result<(), &'static str> {
    if chat_id.trim().is_empty() {
        return Err("Chat id cannot be empty");
    }
    if chat_id.len() > MAX_CHAT_ID_LENGTH {
        return Err("Chat id too long");
    }
    if chat_id.chars().any(char::is_control) {
        return Err("Chat id contains control characters");
    }
    Ok(())
}

/// Sessions subscribed to one chat.
#[derive(Debug)]
pub struct Room {
    chat_id: String,
    sender: broadcast::Sender<Arc<ChatEvent>>,
    sessions: HashSet<String>,
}

impl Room {
    #[must_use]
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self::with_capacity(chat_id, DEFAULT_ROOM_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(chat_id: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            chat_id: chat_id.into(),
            sender,
            sessions: HashSet::new(),
        }
    }

    #[must_use]
    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains(session_id)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Add a session and hand back its event receiver.
    pub fn join(&mut self, session_id: impl Into<String>) -> broadcast::Receiver<Arc<ChatEvent>> {
        let session_id = session_id.into();
        debug!(chat = %self.chat_id, session = %session_id, "Session joined room");
        self.sessions.insert(session_id);
        self.sender.subscribe()
    }

    /// Remove a session. Returns `true` if it was present.
    pub fn leave(&mut self, session_id: &str) -> bool {
        let removed = self.sessions.remove(session_id);
        if removed {
            debug!(chat = %self.chat_id, session = %session_id, "Session left room");
        }
        removed
    }

    /// Deliver an event to every live receiver.
    ///
    /// Returns the number of receivers; zero when nobody is listening.
    pub fn publish(&self, event: Arc<ChatEvent>) -> usize {
        trace!(chat = %self.chat_id, event = %event.event_type, "Publishing to room");
        self.sender.send(event).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::EventKind;

    fn event(chat: &str) -> Arc<ChatEvent> {
        Arc::new(ChatEvent::new(EventKind::Created, chat, 1, "alice", 0).with_content("hi"))
    }

    #[test]
    fn test_chat_id_validation() {
        assert!(validate_chat_id("chat-42").is_ok());
        assert!(validate_chat_id("").is_err());
        assert!(validate_chat_id("   ").is_err());
        assert!(validate_chat_id("bad\nid").is_err());
        assert!(validate_chat_id(&"a".repeat(MAX_CHAT_ID_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_join_leave() {
        let mut room = Room::new("c1");
        let _rx = room.join("s1");
        let _rx2 = room.join("s2");
        assert_eq!(room.session_count(), 2);
        assert!(room.has_session("s1"));

        assert!(room.leave("s1"));
        assert!(!room.leave("s1"));
        assert_eq!(room.session_count(), 1);
        assert!(!room.is_empty());
    }

    #[test]
    fn test_publish_without_receivers() {
        let room = Room::new("c1");
        assert_eq!(room.publish(event("c1")), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_session() {
        let mut room = Room::new("c1");
        let mut rx = room.join("s1");

        assert_eq!(room.publish(event("c1")), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.content.as_deref(), Some("hi"));
    }
}
