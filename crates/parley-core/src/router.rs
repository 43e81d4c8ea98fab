//! Room registry for live sessions.
//!
//! The transport joins a session to a chat's room when the session opens
//! that chat and removes it when the session leaves or disconnects. Rooms
//! are created on first join and dropped when their last session leaves.

use crate::room::{validate_chat_id, Room, DEFAULT_ROOM_CAPACITY};
use dashmap::{DashMap, DashSet};
use parley_protocol::ChatEvent;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Invalid chat id: {0}")]
    InvalidChatId(&'static str),

    #[error("Session not in room: {0}")]
    NotInRoom(String),

    #[error("Session already in room: {0}")]
    AlreadyInRoom(String),

    /// The session has joined its maximum number of rooms.
    #[error("Maximum rooms per session reached")]
    SessionRoomLimit,

    /// No new rooms can be opened.
    #[error("Maximum number of rooms reached")]
    RoomLimit,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub max_rooms: usize,
    pub max_rooms_per_session: usize,
    /// Event buffer per room.
    pub room_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            max_rooms_per_session: 64,
            room_capacity: DEFAULT_ROOM_CAPACITY,
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub room_count: usize,
    pub session_count: usize,
    pub total_memberships: usize,
}

/// Registry of chat rooms and the sessions inside them.
pub struct RoomRouter {
    rooms: DashMap<String, Room>,
    /// Session id -> chat ids it has joined.
    sessions: DashMap<String, DashSet<String>>,
    config: RouterConfig,
}

impl RoomRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!(?config, "Creating room router");
        Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            room_count: self.rooms.len(),
            session_count: self.sessions.len(),
            total_memberships: self.sessions.iter().map(|s| s.len()).sum(),
        }
    }

    /// Join a session to a chat's room.
    ///
    /// # Errors
    ///
    /// Fails if the chat id is invalid, the session is already in the room,
    /// or a room limit is hit.
    pub fn join(
        &self,
        session_id: &str,
        chat_id: &str,
    ) -> Result<broadcast::Receiver<Arc<ChatEvent>>, RouterError> {
        validate_chat_id(chat_id).map_err(RouterError::InvalidChatId)?;

        if let Some(joined) = self.sessions.get(session_id) {
            if joined.contains(chat_id) {
                return Err(RouterError::AlreadyInRoom(chat_id.to_string()));
            }
            if joined.len() >= self.config.max_rooms_per_session {
                return Err(RouterError::SessionRoomLimit);
            }
        }
        if !self.rooms.contains_key(chat_id) && self.rooms.len() >= self.config.max_rooms {
            return Err(RouterError::RoomLimit);
        }

        // Only registered once every limit has passed.
        let joined = self.sessions.entry(session_id.to_string()).or_default();
        let mut room = self.rooms.entry(chat_id.to_string()).or_insert_with(|| {
            debug!(chat = %chat_id, "Opening room");
            Room::with_capacity(chat_id, self.config.room_capacity)
        });
        let receiver = room.join(session_id);
        joined.insert(chat_id.to_string());

        debug!(
            chat = %chat_id,
            session = %session_id,
            sessions = room.session_count(),
            "Joined room"
        );
        Ok(receiver)
    }

    /// Remove a session from a chat's room.
    ///
    /// # Errors
    ///
    /// Returns `NotInRoom` if the session had not joined it.
    pub fn leave(&self, session_id: &str, chat_id: &str) -> Result<(), RouterError> {
        let removed = self
            .sessions
            .get(session_id)
            .is_some_and(|joined| joined.remove(chat_id).is_some());
        if !removed {
            return Err(RouterError::NotInRoom(chat_id.to_string()));
        }
        self.sessions.remove_if(session_id, |_, joined| joined.is_empty());

        self.leave_room(session_id, chat_id);
        Ok(())
    }

    /// Remove a session from every room it joined.
    pub fn leave_all(&self, session_id: &str) {
        if let Some((_, joined)) = self.sessions.remove(session_id) {
            for chat_id in joined.iter() {
                self.leave_room(session_id, chat_id.as_str());
            }
        }
        debug!(session = %session_id, "Left all rooms");
    }

    fn leave_room(&self, session_id: &str, chat_id: &str) {
        let Some(mut room) = self.rooms.get_mut(chat_id) else {
            return;
        };
        room.leave(session_id);
        if room.is_empty() {
            drop(room);
            self.rooms.remove_if(chat_id, |_, room| room.is_empty());
            debug!(chat = %chat_id, "Closed empty room");
        }
    }

    /// Fan an event out to the chat's room.
    ///
    /// Returns the number of receivers reached. A chat without a room is a
    /// no-op.
    pub fn publish(&self, event: ChatEvent) -> usize {
        let chat_id = event.chat_id.clone();
        match self.rooms.get(&chat_id) {
            Some(room) => {
                let count = room.publish(Arc::new(event));
                trace!(chat = %chat_id, recipients = count, "Published event");
                count
            }
            None => {
                trace!(chat = %chat_id, "No room for event");
                0
            }
        }
    }

    #[must_use]
    pub fn room_exists(&self, chat_id: &str) -> bool {
        self.rooms.contains_key(chat_id)
    }

    #[must_use]
    pub fn session_count(&self, chat_id: &str) -> usize {
        self.rooms
            .get(chat_id)
            .map(|room| room.session_count())
            .unwrap_or(0)
    }

    /// Chats a session has joined.
    #[must_use]
    pub fn session_rooms(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|joined| joined.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRouter {
    fn default() -> Self {
        Self::new()
    }
}
