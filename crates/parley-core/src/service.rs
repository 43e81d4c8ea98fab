//! Message service: the single entry point for every message operation.
//!
//! All mutations funnel through here so validation, authorization and
//! event publication happen in one place. Events are published only after
//! the store has accepted the change; a failed publish is logged and never
//! fails the operation.

use crate::broadcast::Broadcaster;
use crate::emoji::{EmojiPolicy, GraphemeEmojiPolicy};
use crate::error::{ErrorKind, ServiceError, ServiceResult};
use crate::guard::{AuthorizationGuard, ChatDirectory, MembershipGuard};
use crate::message::{
    now_millis, ActorId, ChatId, EditRecord, Message, MessageId, MessageKind, NewMessage, Page,
    Tombstone,
};
use crate::room::validate_chat_id;
use crate::store::{MessagePatch, MessageStore, StoreError, MAX_PAGE_SIZE};
use parley_protocol::{ChatEvent, EventKind};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Largest history page a caller may request.
pub const MAX_HISTORY_PAGE_SIZE: u32 = MAX_PAGE_SIZE;

/// Largest search page a caller may request.
pub const MAX_SEARCH_PAGE_SIZE: u32 = 50;

/// A request to send a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub chat_id: ChatId,
    pub sender_id: ActorId,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to: Option<MessageId>,
    pub attachments: Vec<String>,
    /// Display name carried on the `Created` event. Not stored.
    pub sender_name: Option<String>,
}

impl SendMessage {
    /// A plain text message.
    #[must_use]
    pub fn text(
        chat_id: impl Into<ChatId>,
        sender_id: impl Into<ActorId>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            reply_to: None,
            attachments: Vec::new(),
            sender_name: None,
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn reply_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    #[must_use]
    pub fn with_sender_name(mut self, name: Option<String>) -> Self {
        self.sender_name = name;
        self
    }
}

/// Orchestrates the store, the guard and the broadcaster.
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    guard: Arc<dyn AuthorizationGuard>,
    directory: Arc<dyn ChatDirectory>,
    broadcaster: Arc<dyn Broadcaster>,
    emoji: Arc<dyn EmojiPolicy>,
}

impl MessageService {
    /// Create a service with a [`MembershipGuard`] over `directory` and the
    /// default emoji policy.
    #[must_use]
    pub fn new(
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn ChatDirectory>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            guard: Arc::new(MembershipGuard::new(directory.clone())),
            directory,
            broadcaster,
            emoji: Arc::new(GraphemeEmojiPolicy),
        }
    }

    /// Replace the authorization guard.
    #[must_use]
    pub fn with_guard(mut self, guard: Arc<dyn AuthorizationGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Replace the reaction emoji policy.
    #[must_use]
    pub fn with_emoji_policy(mut self, policy: Arc<dyn EmojiPolicy>) -> Self {
        self.emoji = policy;
        self
    }

    /// Send a message to a chat.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a missing chat id, sender or content, `Forbidden`
    /// if the sender is not a participant, `InvalidReference` if `reply_to`
    /// is not a live message of the same chat.
    pub async fn create_message(&self, request: SendMessage) -> ServiceResult<Message> {
        validate_chat_id(&request.chat_id).map_err(ServiceError::invalid)?;
        if request.sender_id.trim().is_empty() {
            return Err(ServiceError::invalid("Sender is required"));
        }
        if request.content.trim().is_empty() {
            return Err(ServiceError::invalid("Content is required"));
        }
        if request.attachments.iter().any(|a| a.trim().is_empty()) {
            return Err(ServiceError::invalid("Attachment references cannot be blank"));
        }

        self.require_read(&request.sender_id, &request.chat_id).await?;

        if let Some(parent) = request.reply_to {
            self.check_reply_target(&request.chat_id, parent).await?;
        }

        let stored = self
            .store
            .insert(NewMessage {
                chat_id: request.chat_id,
                sender_id: request.sender_id,
                content: request.content,
                kind: request.kind,
                attachments: request.attachments,
                reply_to: request.reply_to,
            })
            .await
            .map_err(|e| self.store_failure("insert", e))?;

        info!(
            chat = %stored.chat_id,
            message_id = stored.id,
            sender = %stored.sender_id,
            kind = %stored.kind,
            "Message created"
        );

        self.announce(
            ChatEvent::new(
                EventKind::Created,
                stored.chat_id.clone(),
                stored.id,
                stored.sender_id.clone(),
                stored.created_at,
            )
            .with_content(stored.content.clone())
            .with_sender_name(request.sender_name),
        );

        Ok(stored)
    }

    /// Replace the content of a message. Only its sender may edit it.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, or `InvalidInput` for blank content.
    pub async fn update_message(
        &self,
        message_id: MessageId,
        new_content: &str,
        actor: &str,
    ) -> ServiceResult<Message> {
        let message = self.load_live(message_id).await?;
        if !self.guard.can_modify(actor, &message) {
            debug!(message_id, actor = %actor, "Edit refused");
            return Err(ServiceError::Forbidden);
        }
        if new_content.trim().is_empty() {
            return Err(ServiceError::invalid("Content is required"));
        }

        let edited_at = now_millis();
        let updated = self
            .store
            .update(message_id, MessagePatch::edit(new_content, edited_at))
            .await
            .map_err(|e| self.store_failure("edit", e))?;

        info!(chat = %updated.chat_id, message_id, "Message edited");
        self.announce(
            ChatEvent::new(
                EventKind::Edited,
                updated.chat_id.clone(),
                message_id,
                actor,
                edited_at,
            )
            .with_content(updated.content.clone()),
        );

        Ok(updated)
    }

    /// Soft-delete a message. Only its sender may delete it.
    ///
    /// # Errors
    ///
    /// `NotFound` or `Forbidden`.
    pub async fn delete_message(&self, message_id: MessageId, actor: &str) -> ServiceResult<Tombstone> {
        let message = self.load_live(message_id).await?;
        if !self.guard.can_modify(actor, &message) {
            debug!(message_id, actor = %actor, "Delete refused");
            return Err(ServiceError::Forbidden);
        }

        let deleted_at = now_millis();
        self.store
            .update(message_id, MessagePatch::delete(deleted_at))
            .await
            .map_err(|e| self.store_failure("delete", e))?;

        info!(chat = %message.chat_id, message_id, "Message deleted");
        self.announce(ChatEvent::new(
            EventKind::Deleted,
            message.chat_id.clone(),
            message_id,
            actor,
            deleted_at,
        ));

        Ok(Tombstone {
            id: message_id,
            chat_id: message.chat_id,
            deleted_at,
        })
    }

    /// Record that `actor` has read a message. Repeating it changes nothing.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Forbidden` if the actor is not a participant.
    pub async fn mark_message_as_read(
        &self,
        message_id: MessageId,
        actor: &str,
    ) -> ServiceResult<Message> {
        let message = self.load_live(message_id).await?;
        self.require_read(actor, &message.chat_id).await?;
        if message.read_by.contains(actor) {
            return Ok(message);
        }

        let updated = self
            .store
            .update(message_id, MessagePatch::mark_read(actor))
            .await
            .map_err(|e| self.store_failure("mark_read", e))?;

        self.announce(ChatEvent::new(
            EventKind::Read,
            updated.chat_id.clone(),
            message_id,
            actor,
            now_millis(),
        ));

        Ok(updated)
    }

    /// Set or replace `actor`'s reaction on a message.
    ///
    /// # Errors
    ///
    /// `InvalidInput` unless `emoji` is a single emoji, `NotFound`, or
    /// `Forbidden` if the actor is not a participant.
    pub async fn add_reaction(
        &self,
        message_id: MessageId,
        actor: &str,
        emoji: &str,
    ) -> ServiceResult<Message> {
        if !self.emoji.is_single_emoji(emoji) {
            return Err(ServiceError::invalid("Reaction must be a single emoji"));
        }
        let message = self.load_live(message_id).await?;
        self.require_read(actor, &message.chat_id).await?;

        let updated = self
            .store
            .update(message_id, MessagePatch::react(actor, emoji))
            .await
            .map_err(|e| self.store_failure("react", e))?;

        debug!(message_id, actor = %actor, emoji = %emoji, "Reaction set");
        self.announce(
            ChatEvent::new(
                EventKind::Reaction,
                updated.chat_id.clone(),
                message_id,
                actor,
                now_millis(),
            )
            .with_content(emoji),
        );

        Ok(updated)
    }

    /// Remove `actor`'s reaction from a message, if there is one.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Forbidden` if the actor is not a participant.
    pub async fn remove_reaction(&self, message_id: MessageId, actor: &str) -> ServiceResult<Message> {
        let message = self.load_live(message_id).await?;
        self.require_read(actor, &message.chat_id).await?;
        if !message.reactions.contains_key(actor) {
            return Ok(message);
        }

        let updated = self
            .store
            .update(message_id, MessagePatch::unreact(actor))
            .await
            .map_err(|e| self.store_failure("unreact", e))?;

        debug!(message_id, actor = %actor, "Reaction removed");
        self.announce(ChatEvent::new(
            EventKind::Reaction,
            updated.chat_id.clone(),
            message_id,
            actor,
            now_millis(),
        ));

        Ok(updated)
    }

    /// Mark every message in a chat as read by `actor`.
    ///
    /// Returns how many messages were newly marked.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad chat id, `Forbidden` for non-participants.
    pub async fn mark_chat_as_read(&self, chat_id: &str, actor: &str) -> ServiceResult<u64> {
        validate_chat_id(chat_id).map_err(ServiceError::invalid)?;
        self.require_read(actor, chat_id).await?;

        let marked = self
            .store
            .mark_chat_read(chat_id, actor)
            .await
            .map_err(|e| self.store_failure("mark_chat_read", e))?;
        debug!(chat = %chat_id, actor = %actor, marked, "Chat marked read");
        Ok(marked)
    }

    /// A page of chat history, newest first.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for bad pagination, `Forbidden` for non-participants.
    pub async fn get_chat_messages(
        &self,
        chat_id: &str,
        actor: &str,
        page: u32,
        page_size: u32,
    ) -> ServiceResult<Page<Message>> {
        validate_chat_id(chat_id).map_err(ServiceError::invalid)?;
        check_pagination(page, page_size, MAX_HISTORY_PAGE_SIZE)?;
        self.require_read(actor, chat_id).await?;

        self.store
            .list_by_chat(chat_id, page, page_size)
            .await
            .map_err(|e| self.store_failure("list", e))
    }

    /// Search a chat's live messages, newest first. No hits is an empty page.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a blank query or bad pagination, `Forbidden` for
    /// non-participants.
    pub async fn search_messages(
        &self,
        chat_id: &str,
        actor: &str,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> ServiceResult<Page<Message>> {
        validate_chat_id(chat_id).map_err(ServiceError::invalid)?;
        let query = query.trim();
        if query.is_empty() {
            return Err(ServiceError::invalid("Search query is required"));
        }
        check_pagination(page, page_size, MAX_SEARCH_PAGE_SIZE)?;
        self.require_read(actor, chat_id).await?;

        self.store
            .search_in_chat(chat_id, query, page, page_size)
            .await
            .map_err(|e| self.store_failure("search", e))
    }

    /// Unread messages across every chat `actor` participates in.
    ///
    /// # Errors
    ///
    /// `Storage` if the directory or store fails.
    pub async fn get_unread_message_count(&self, actor: &str) -> ServiceResult<u64> {
        let chats = self.directory.chats_for(actor).await.map_err(|e| {
            error!(actor = %actor, error = %e, "Chat lookup failed");
            ServiceError::from(e)
        })?;

        self.store
            .count_unread(actor, &chats)
            .await
            .map_err(|e| self.store_failure("count_unread", e))
    }

    /// Replaced contents of a message, oldest first.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `Forbidden` for non-participants.
    pub async fn get_edit_history(
        &self,
        message_id: MessageId,
        actor: &str,
    ) -> ServiceResult<Vec<EditRecord>> {
        let message = self.load_live(message_id).await?;
        self.require_read(actor, &message.chat_id).await?;
        Ok(message.edits)
    }

    /// Check that `actor` may join the live room of `chat_id`.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for a bad chat id, `Forbidden` for non-participants.
    pub async fn authorize_room(&self, chat_id: &str, actor: &str) -> ServiceResult<()> {
        validate_chat_id(chat_id).map_err(ServiceError::invalid)?;
        self.require_read(actor, chat_id).await
    }

    async fn require_read(&self, actor: &str, chat_id: &str) -> ServiceResult<()> {
        if self.guard.can_read(actor, chat_id).await {
            Ok(())
        } else {
            debug!(chat = %chat_id, actor = %actor, "Read access refused");
            Err(ServiceError::Forbidden)
        }
    }

    async fn load_live(&self, message_id: MessageId) -> ServiceResult<Message> {
        let message = self
            .store
            .find_by_id(message_id)
            .await
            .map_err(|e| self.store_failure("find", e))?;
        if message.is_deleted() {
            return Err(ServiceError::NotFound(message_id));
        }
        Ok(message)
    }

    async fn check_reply_target(&self, chat_id: &str, parent: MessageId) -> ServiceResult<()> {
        let target = match self.store.find_by_id(parent).await {
            Ok(message) => message,
            Err(StoreError::NotFound(_)) => {
                return Err(ServiceError::InvalidReference(format!(
                    "Reply target {} does not exist",
                    parent
                )))
            }
            Err(e) => return Err(self.store_failure("find", e)),
        };

        if target.chat_id != chat_id || target.is_deleted() {
            return Err(ServiceError::InvalidReference(format!(
                "Reply target {} is not a message of this chat",
                parent
            )));
        }
        Ok(())
    }

    fn store_failure(&self, op: &'static str, e: StoreError) -> ServiceError {
        let err = ServiceError::from(e);
        if err.kind() == ErrorKind::Storage {
            error!(op, error = %err, "Store operation failed");
        }
        err
    }

    fn announce(&self, event: ChatEvent) {
        let chat_id = event.chat_id.clone();
        let kind = event.event_type;
        if let Err(e) = self.broadcaster.publish(event) {
            warn!(chat = %chat_id, event = %kind, error = %e, "Broadcast dropped");
        }
    }
}

fn check_pagination(page: u32, page_size: u32, max_page_size: u32) -> ServiceResult<()> {
    if page < 1 {
        return Err(ServiceError::invalid("Page must be at least 1"));
    }
    if page_size < 1 || page_size > max_page_size {
        return Err(ServiceError::InvalidInput(format!(
            "Page size must be between 1 and {}",
            max_page_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::BroadcastError;
    use crate::guard::MemoryDirectory;
    use crate::memory::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingBroadcaster {
        events: Mutex<Vec<ChatEvent>>,
        closed: bool,
    }

    impl RecordingBroadcaster {
        fn events(&self) -> Vec<ChatEvent> {
            self.events.lock().unwrap().clone()
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.events().iter().map(|e| e.event_type).collect()
        }
    }

    impl Broadcaster for RecordingBroadcaster {
        fn publish(&self, event: ChatEvent) -> Result<(), BroadcastError> {
            if self.closed {
                return Err(BroadcastError::Closed);
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Fixture {
        service: MessageService,
        store: Arc<MemoryStore>,
        events: Arc<RecordingBroadcaster>,
    }

    /// Chat "c" with participants "a" and "b"; chat "other" with "a" and "d".
    fn fixture_with(events: RecordingBroadcaster) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_chat("c", ["a", "b"]);
        directory.set_chat("other", ["a", "d"]);
        let events = Arc::new(events);
        let service = MessageService::new(store.clone(), directory, events.clone());
        Fixture {
            service,
            store,
            events,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingBroadcaster::default())
    }

    async fn send(fx: &Fixture, sender: &str, content: &str) -> Message {
        fx.service
            .create_message(SendMessage::text("c", sender, content))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_scenario_participants_and_outsider() {
        let fx = fixture();

        let sent = send(&fx, "a", "hello").await;
        assert_eq!(sent.kind, MessageKind::Text);

        let page = fx.service.get_chat_messages("c", "b", 1, 50).await.unwrap();
        assert_eq!(page.items.len(), 1);
        let seen = &page.items[0];
        assert_eq!(seen.content, "hello");
        assert_eq!(seen.sender_id, "a");
        assert!(seen.reactions.is_empty());
        assert!(!seen.read_by.contains("b"));

        let read = fx.service.mark_message_as_read(sent.id, "b").await.unwrap();
        assert!(read.read_by.contains("b"));

        let reacted = fx.service.add_reaction(sent.id, "b", "👍").await.unwrap();
        assert_eq!(reacted.reactions["b"], "👍");

        let edited = fx
            .service
            .update_message(sent.id, "hello there", "a")
            .await
            .unwrap();
        assert_eq!(edited.content, "hello there");
        assert!(edited.edited_at.is_some());

        let outsider = fx.service.get_chat_messages("c", "outsider", 1, 50).await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);

        assert_eq!(
            fx.events.kinds(),
            [
                EventKind::Created,
                EventKind::Read,
                EventKind::Reaction,
                EventKind::Edited
            ]
        );
    }

    #[tokio::test]
    async fn test_create_validation() {
        let fx = fixture();

        let blank = fx
            .service
            .create_message(SendMessage::text("c", "a", "   "))
            .await;
        assert_eq!(blank.unwrap_err().kind(), ErrorKind::InvalidInput);

        let no_chat = fx
            .service
            .create_message(SendMessage::text("", "a", "hi"))
            .await;
        assert_eq!(no_chat.unwrap_err().kind(), ErrorKind::InvalidInput);

        let outsider = fx
            .service
            .create_message(SendMessage::text("c", "d", "hi"))
            .await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);

        let blank_attachment = fx
            .service
            .create_message(
                SendMessage::text("c", "a", "see file")
                    .with_kind(MessageKind::Attachment)
                    .with_attachments(vec![" ".into()]),
            )
            .await;
        assert_eq!(blank_attachment.unwrap_err().kind(), ErrorKind::InvalidInput);

        assert!(fx.store.is_empty());
        assert!(fx.events.events().is_empty());
    }

    #[tokio::test]
    async fn test_attachments_and_kind_kept() {
        let fx = fixture();
        let sent = fx
            .service
            .create_message(
                SendMessage::text("c", "a", "photos")
                    .with_kind(MessageKind::Attachment)
                    .with_attachments(vec!["att://1".into(), "att://2".into()]),
            )
            .await
            .unwrap();

        let stored = fx.store.find_by_id(sent.id).await.unwrap();
        assert_eq!(stored.kind, MessageKind::Attachment);
        assert_eq!(stored.attachments, ["att://1", "att://2"]);
    }

    #[tokio::test]
    async fn test_reply_must_target_same_chat() {
        let fx = fixture();
        let parent = send(&fx, "a", "question").await;
        let elsewhere = fx
            .service
            .create_message(SendMessage::text("other", "a", "elsewhere"))
            .await
            .unwrap();

        let reply = fx
            .service
            .create_message(SendMessage::text("c", "b", "answer").reply_to(parent.id))
            .await
            .unwrap();
        assert_eq!(reply.reply_to, Some(parent.id));

        let cross_chat = fx
            .service
            .create_message(SendMessage::text("c", "b", "answer").reply_to(elsewhere.id))
            .await;
        assert_eq!(cross_chat.unwrap_err().kind(), ErrorKind::InvalidReference);

        let missing = fx
            .service
            .create_message(SendMessage::text("c", "b", "answer").reply_to(9_999))
            .await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::InvalidReference);

        fx.service.delete_message(parent.id, "a").await.unwrap();
        let to_deleted = fx
            .service
            .create_message(SendMessage::text("c", "b", "late").reply_to(parent.id))
            .await;
        assert_eq!(to_deleted.unwrap_err().kind(), ErrorKind::InvalidReference);
    }

    #[tokio::test]
    async fn test_reaction_replaces_previous() {
        let fx = fixture();
        let sent = send(&fx, "a", "hi").await;

        fx.service.add_reaction(sent.id, "b", "👍").await.unwrap();
        let updated = fx.service.add_reaction(sent.id, "b", "🎉").await.unwrap();

        assert_eq!(updated.reactions.len(), 1);
        assert_eq!(updated.reactions["b"], "🎉");
    }

    #[tokio::test]
    async fn test_reaction_rules() {
        let fx = fixture();
        let sent = send(&fx, "a", "hi").await;

        for bad in ["", "ok", "👍👍"] {
            let result = fx.service.add_reaction(sent.id, "b", bad).await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
        }
        let outsider = fx.service.add_reaction(sent.id, "d", "👍").await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);
        let missing = fx.service.add_reaction(404, "b", "👍").await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        fx.service.add_reaction(sent.id, "b", "🇯🇵").await.unwrap();
        let cleared = fx.service.remove_reaction(sent.id, "b").await.unwrap();
        assert!(cleared.reactions.is_empty());
        let again = fx.service.remove_reaction(sent.id, "b").await.unwrap();
        assert!(again.reactions.is_empty());

        let reaction_events: Vec<_> = fx
            .events
            .events()
            .into_iter()
            .filter(|e| e.event_type == EventKind::Reaction)
            .map(|e| e.content)
            .collect();
        assert_eq!(reaction_events, [Some("🇯🇵".to_string()), None]);
    }

    #[tokio::test]
    async fn test_mark_read_idempotent() {
        let fx = fixture();
        let sent = send(&fx, "a", "hi").await;

        let once = fx.service.mark_message_as_read(sent.id, "b").await.unwrap();
        let twice = fx.service.mark_message_as_read(sent.id, "b").await.unwrap();
        assert_eq!(once.read_by, twice.read_by);
        assert_eq!(twice.read_by.len(), 1);

        let read_events = fx
            .events
            .kinds()
            .into_iter()
            .filter(|k| *k == EventKind::Read)
            .count();
        assert_eq!(read_events, 1);

        let outsider = fx.service.mark_message_as_read(sent.id, "d").await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);
        let missing = fx.service.mark_message_as_read(404, "b").await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_non_sender_cannot_edit_or_delete() {
        let fx = fixture();
        let sent = send(&fx, "a", "original").await;

        let edit = fx.service.update_message(sent.id, "hijacked", "b").await;
        assert_eq!(edit.unwrap_err().kind(), ErrorKind::Forbidden);
        let delete = fx.service.delete_message(sent.id, "b").await;
        assert_eq!(delete.unwrap_err().kind(), ErrorKind::Forbidden);

        let stored = fx.store.find_by_id(sent.id).await.unwrap();
        assert_eq!(stored, sent);
    }

    #[tokio::test]
    async fn test_edit_validation_and_history() {
        let fx = fixture();
        let sent = send(&fx, "a", "v1").await;

        let blank = fx.service.update_message(sent.id, "  ", "a").await;
        assert_eq!(blank.unwrap_err().kind(), ErrorKind::InvalidInput);
        let missing = fx.service.update_message(404, "v2", "a").await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        fx.service.update_message(sent.id, "v2", "a").await.unwrap();
        fx.service.update_message(sent.id, "v3", "a").await.unwrap();

        let history = fx.service.get_edit_history(sent.id, "b").await.unwrap();
        let contents: Vec<_> = history.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["v1", "v2"]);

        let outsider = fx.service.get_edit_history(sent.id, "d").await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_deleted_message_disappears() {
        let fx = fixture();
        let doomed = send(&fx, "a", "secret plan").await;
        let kept = send(&fx, "a", "public plan").await;

        let tombstone = fx.service.delete_message(doomed.id, "a").await.unwrap();
        assert_eq!(tombstone.id, doomed.id);
        assert_eq!(tombstone.chat_id, "c");

        let page = fx.service.get_chat_messages("c", "b", 1, 50).await.unwrap();
        assert_eq!(page.items.iter().map(|m| m.id).collect::<Vec<_>>(), [kept.id]);

        let hits = fx
            .service
            .search_messages("c", "b", "plan", 1, 20)
            .await
            .unwrap();
        assert_eq!(hits.items.len(), 1);
        assert_eq!(hits.items[0].id, kept.id);

        assert_eq!(fx.service.get_unread_message_count("b").await.unwrap(), 1);

        let fresh = send(&fx, "a", "new").await;
        assert!(fresh.id != doomed.id);

        for result in [
            fx.service.update_message(doomed.id, "x", "a").await.map(|_| ()),
            fx.service.delete_message(doomed.id, "a").await.map(|_| ()),
            fx.service.mark_message_as_read(doomed.id, "b").await.map(|_| ()),
            fx.service.add_reaction(doomed.id, "b", "👍").await.map(|_| ()),
        ] {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound);
        }

        let delete_event = fx
            .events
            .events()
            .into_iter()
            .find(|e| e.event_type == EventKind::Deleted)
            .unwrap();
        assert_eq!(delete_event.message_id, doomed.id);
        assert!(delete_event.content.is_none());
        assert!(fx.store.find_by_id(doomed.id).await.unwrap().content.is_empty());
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let fx = fixture();
        for i in 1..=25 {
            send(&fx, "a", &format!("m{}", i)).await;
        }

        let second = fx.service.get_chat_messages("c", "b", 2, 10).await.unwrap();
        let contents: Vec<_> = second.items.iter().map(|m| m.content.clone()).collect();
        let expected: Vec<_> = (6..=15).rev().map(|i| format!("m{}", i)).collect();
        assert_eq!(contents, expected);
        assert_eq!((second.page, second.page_size), (2, 10));

        let beyond = fx.service.get_chat_messages("c", "b", 10, 10).await.unwrap();
        assert!(beyond.items.is_empty());

        for (page, size) in [(0, 10), (1, 0), (1, 101)] {
            let result = fx.service.get_chat_messages("c", "b", page, size).await;
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
        }
    }

    #[tokio::test]
    async fn test_search_rules() {
        let fx = fixture();
        send(&fx, "a", "Pizza tonight?").await;
        send(&fx, "b", "pizza sounds good").await;

        let hits = fx
            .service
            .search_messages("c", "b", "PIZZA", 1, 20)
            .await
            .unwrap();
        assert_eq!(hits.items.len(), 2);

        let none = fx.service.search_messages("c", "b", "xyz", 1, 20).await.unwrap();
        assert!(none.items.is_empty());
        assert!(!none.has_more);

        let blank = fx.service.search_messages("c", "b", "  ", 1, 20).await;
        assert_eq!(blank.unwrap_err().kind(), ErrorKind::InvalidInput);
        let too_big = fx.service.search_messages("c", "b", "pizza", 1, 51).await;
        assert_eq!(too_big.unwrap_err().kind(), ErrorKind::InvalidInput);
        let outsider = fx.service.search_messages("c", "d", "pizza", 1, 20).await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn test_unread_counts_across_chats() {
        let fx = fixture();
        let first = send(&fx, "b", "one").await;
        send(&fx, "b", "two").await;
        send(&fx, "a", "own message").await;
        fx.service
            .create_message(SendMessage::text("other", "d", "three"))
            .await
            .unwrap();

        assert_eq!(fx.service.get_unread_message_count("a").await.unwrap(), 3);

        fx.service.mark_message_as_read(first.id, "a").await.unwrap();
        assert_eq!(fx.service.get_unread_message_count("a").await.unwrap(), 2);

        assert_eq!(fx.service.mark_chat_as_read("c", "a").await.unwrap(), 1);
        assert_eq!(fx.service.get_unread_message_count("a").await.unwrap(), 1);

        let outsider = fx.service.mark_chat_as_read("c", "d").await;
        assert_eq!(outsider.unwrap_err().kind(), ErrorKind::Forbidden);
        assert_eq!(fx.service.get_unread_message_count("nobody").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_failure_does_not_fail_send() {
        let fx = fixture_with(RecordingBroadcaster {
            closed: true,
            ..RecordingBroadcaster::default()
        });

        let sent = send(&fx, "a", "still stored").await;
        assert_eq!(fx.store.find_by_id(sent.id).await.unwrap().content, "still stored");
    }

    #[tokio::test]
    async fn test_created_event_payload() {
        let fx = fixture();
        let sent = send(&fx, "a", "hello").await;

        let event = &fx.events.events()[0];
        assert_eq!(event.chat_id, "c");
        assert_eq!(event.message_id, sent.id);
        assert_eq!(event.sender_id, "a");
        assert_eq!(event.content.as_deref(), Some("hello"));
        assert_eq!(event.timestamp, sent.created_at);
    }

    #[tokio::test]
    async fn test_sender_name_reaches_created_event_only() {
        let fx = fixture();
        let sent = fx
            .service
            .create_message(
                SendMessage::text("c", "a", "hello").with_sender_name(Some("Ada".into())),
            )
            .await
            .unwrap();
        fx.service.update_message(sent.id, "hello again", "a").await.unwrap();

        let events = fx.events.events();
        assert_eq!(events[0].sender_name.as_deref(), Some("Ada"));
        assert_eq!(events[1].event_type, EventKind::Edited);
        assert_eq!(events[1].sender_name, None);
    }

    /// Accepts only the letter "x" as a reaction.
    struct LetterXPolicy;

    impl EmojiPolicy for LetterXPolicy {
        fn is_single_emoji(&self, candidate: &str) -> bool {
            candidate == "x"
        }
    }

    /// Anyone may read; only "moderator" may modify.
    struct ModeratorGuard;

    #[async_trait::async_trait]
    impl AuthorizationGuard for ModeratorGuard {
        async fn can_read(&self, _actor: &str, _chat_id: &str) -> bool {
            true
        }

        fn can_modify(&self, actor: &str, _message: &Message) -> bool {
            actor == "moderator"
        }
    }

    #[tokio::test]
    async fn test_custom_guard_and_emoji_policy() {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        directory.set_chat("c", ["a"]);
        let service = MessageService::new(
            store.clone(),
            directory,
            Arc::new(RecordingBroadcaster::default()),
        )
        .with_guard(Arc::new(ModeratorGuard))
        .with_emoji_policy(Arc::new(LetterXPolicy));

        // Read access now ignores the participant list.
        let sent = service
            .create_message(SendMessage::text("c", "outsider", "hi"))
            .await
            .unwrap();

        let thumbs = service.add_reaction(sent.id, "a", "👍").await;
        assert_eq!(thumbs.unwrap_err().kind(), ErrorKind::InvalidInput);
        let reacted = service.add_reaction(sent.id, "a", "x").await.unwrap();
        assert_eq!(reacted.reactions["a"], "x");

        let by_author = service.update_message(sent.id, "mine", "outsider").await;
        assert_eq!(by_author.unwrap_err().kind(), ErrorKind::Forbidden);
        let edited = service
            .update_message(sent.id, "moderated", "moderator")
            .await
            .unwrap();
        assert_eq!(edited.content, "moderated");
        service.delete_message(sent.id, "moderator").await.unwrap();
        assert!(store.find_by_id(sent.id).await.unwrap().deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_room_authorization() {
        let fx = fixture();
        assert!(fx.service.authorize_room("c", "b").await.is_ok());
        assert_eq!(
            fx.service.authorize_room("c", "d").await.unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            fx.service.authorize_room("", "b").await.unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }
}
