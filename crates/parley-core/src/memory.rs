//! In-memory message store.
//!
//! Records live in a sharded concurrent map; a per-chat index keeps message
//! ids sorted so history pages stay stable under concurrent inserts. Each
//! patch runs while holding the record's shard lock.

use crate::message::{now_millis, ChatId, Message, MessageId, NewMessage, Page};
use crate::store::{clamp_page, MessagePatch, MessageStore, StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A [`MessageStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: DashMap<MessageId, Message>,
    /// Chat id -> message ids in ascending order.
    chats: DashMap<ChatId, Vec<MessageId>>,
    last_id: AtomicU64,
    last_created_at: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn next_timestamp(&self) -> u64 {
        let now = now_millis();
        let previous = self.last_created_at.fetch_max(now, Ordering::AcqRel);
        now.max(previous)
    }

    fn chat_ids(&self, chat_id: &str) -> Vec<MessageId> {
        self.chats
            .get(chat_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    fn is_live_match(&self, id: &MessageId, matches: &impl Fn(&Message) -> bool) -> bool {
        self.messages
            .get(id)
            .is_some_and(|m| !m.is_deleted() && matches(m.value()))
    }

    fn page_of(
        &self,
        chat_id: &str,
        page: u32,
        page_size: u32,
        matches: impl Fn(&Message) -> bool,
    ) -> Page<Message> {
        let (page, page_size) = clamp_page(page, page_size);
        let offset = (page as usize - 1) * page_size as usize;
        let ids = self.chat_ids(chat_id);

        let mut items: Vec<Message> = ids
            .iter()
            .rev()
            .filter(|id| self.is_live_match(id, &matches))
            .skip(offset)
            .take(page_size as usize + 1)
            .filter_map(|id| self.messages.get(id).map(|m| m.value().clone()))
            .collect();

        let has_more = items.len() > page_size as usize;
        items.truncate(page_size as usize);

        Page {
            items,
            page,
            page_size,
            has_more,
        }
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: NewMessage) -> StoreResult<Message> {
        let id = self.last_id.fetch_add(1, Ordering::AcqRel) + 1;
        let created_at = self.next_timestamp();
        let chat_id = message.chat_id.clone();
        let stored = message.into_message(id, created_at);

        match self.messages.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(stored.clone());
            }
        }

        let mut ids = self.chats.entry(chat_id).or_default();
        let position = ids.partition_point(|existing| *existing < id);
        ids.insert(position, id);

        debug!(chat = %stored.chat_id, message_id = id, "Stored message");
        Ok(stored)
    }

    async fn find_by_id(&self, id: MessageId) -> StoreResult<Message> {
        self.messages
            .get(&id)
            .map(|m| m.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_by_chat(
        &self,
        chat_id: &str,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<Message>> {
        Ok(self.page_of(chat_id, page, page_size, |_| true))
    }

    async fn update(&self, id: MessageId, patch: MessagePatch) -> StoreResult<Message> {
        let mut entry = self.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if entry.is_deleted() {
            return Err(StoreError::Tombstoned(id));
        }

        let changed = patch.apply(entry.value_mut());
        trace!(message_id = id, changed, "Applied patch");
        Ok(entry.value().clone())
    }

    async fn search_in_chat(
        &self,
        chat_id: &str,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> StoreResult<Page<Message>> {
        let needle = query.to_lowercase();
        Ok(self.page_of(chat_id, page, page_size, |m| {
            m.content.to_lowercase().contains(&needle)
        }))
    }

    async fn count_unread(&self, actor: &str, chats: &[ChatId]) -> StoreResult<u64> {
        let count = chats
            .iter()
            .flat_map(|chat_id| self.chat_ids(chat_id))
            .filter(|id| {
                self.messages
                    .get(id)
                    .is_some_and(|m| m.is_unread_by(actor))
            })
            .count();
        Ok(count as u64)
    }

    async fn mark_chat_read(&self, chat_id: &str, actor: &str) -> StoreResult<u64> {
        let mut marked = 0;
        for id in self.chat_ids(chat_id) {
            if let Some(mut entry) = self.messages.get_mut(&id) {
                if entry.is_unread_by(actor) && MessagePatch::mark_read(actor).apply(entry.value_mut()) {
                    marked += 1;
                }
            }
        }
        debug!(chat = %chat_id, actor = %actor, marked, "Marked chat read");
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use std::sync::Arc;

    fn new_message(chat: &str, sender: &str, content: &str) -> NewMessage {
        NewMessage {
            chat_id: chat.into(),
            sender_id: sender.into(),
            content: content.into(),
            kind: MessageKind::Text,
            attachments: vec![],
            reply_to: None,
        }
    }

    async fn seed(store: &MemoryStore, chat: &str, count: usize) -> Vec<Message> {
        let mut out = Vec::new();
        for i in 1..=count {
            out.push(
                store
                    .insert(new_message(chat, "alice", &format!("message {}", i)))
                    .await
                    .unwrap(),
            );
        }
        out
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_timestamps() {
        let store = MemoryStore::new();
        let stored = seed(&store, "c1", 5).await;

        for pair in stored.windows(2) {
            assert!(pair[1].id > pair[0].id);
            assert!(pair[1].created_at >= pair[0].created_at);
        }
        assert_eq!(store.len(), 5);
    }

    #[tokio::test]
    async fn test_second_page_newest_first() {
        let store = MemoryStore::new();
        seed(&store, "c1", 25).await;

        let page = store.list_by_chat("c1", 2, 10).await.unwrap();
        let contents: Vec<_> = page.items.iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (6..=15).rev().map(|i| format!("message {}", i)).collect();
        assert_eq!(contents, expected);
        assert!(page.has_more);

        let last = store.list_by_chat("c1", 3, 10).await.unwrap();
        assert_eq!(last.items.len(), 5);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_page_past_end_is_empty() {
        let store = MemoryStore::new();
        seed(&store, "c1", 3).await;

        let page = store.list_by_chat("c1", 9, 10).await.unwrap();
        assert!(page.items.is_empty());
        assert!(!page.has_more);

        let unknown = store.list_by_chat("nope", 1, 10).await.unwrap();
        assert!(unknown.items.is_empty());
    }

    #[tokio::test]
    async fn test_page_size_clamped() {
        let store = MemoryStore::new();
        seed(&store, "c1", 120).await;

        let page = store.list_by_chat("c1", 1, 1000).await.unwrap();
        assert_eq!(page.page_size, 100);
        assert_eq!(page.items.len(), 100);
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn test_deleted_hidden_and_id_reserved() {
        let store = MemoryStore::new();
        let stored = seed(&store, "c1", 2).await;
        store
            .update(stored[0].id, MessagePatch::delete(now_millis()))
            .await
            .unwrap();

        let page = store.list_by_chat("c1", 1, 10).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, stored[1].id);

        let fresh = store.insert(new_message("c1", "bob", "new")).await.unwrap();
        assert!(fresh.id > stored[1].id);

        assert!(matches!(
            store.update(stored[0].id, MessagePatch::edit("back", 1)).await,
            Err(StoreError::Tombstoned(_))
        ));
        assert!(store.find_by_id(stored[0].id).await.unwrap().is_deleted());
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update(42, MessagePatch::mark_read("bob")).await,
            Err(StoreError::NotFound(42))
        ));
        assert!(matches!(
            store.find_by_id(42).await,
            Err(StoreError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_search_case_insensitive() {
        let store = MemoryStore::new();
        store.insert(new_message("c1", "alice", "Lunch at noon?")).await.unwrap();
        store.insert(new_message("c1", "bob", "no LUNCH today")).await.unwrap();
        store.insert(new_message("c1", "bob", "something else")).await.unwrap();
        store.insert(new_message("c2", "bob", "lunch elsewhere")).await.unwrap();

        let hits = store.search_in_chat("c1", "lunch", 1, 10).await.unwrap();
        assert_eq!(hits.items.len(), 2);
        assert_eq!(hits.items[0].content, "no LUNCH today");

        let none = store.search_in_chat("c1", "xyz", 1, 10).await.unwrap();
        assert!(none.items.is_empty());
    }

    #[tokio::test]
    async fn test_count_unread_and_mark_chat_read() {
        let store = MemoryStore::new();
        let first = store.insert(new_message("c1", "alice", "a")).await.unwrap();
        store.insert(new_message("c1", "alice", "b")).await.unwrap();
        store.insert(new_message("c1", "bob", "mine")).await.unwrap();
        store.insert(new_message("c2", "alice", "c")).await.unwrap();
        let chats = vec!["c1".to_string(), "c2".to_string()];

        assert_eq!(store.count_unread("bob", &chats).await.unwrap(), 3);

        store.update(first.id, MessagePatch::mark_read("bob")).await.unwrap();
        assert_eq!(store.count_unread("bob", &chats).await.unwrap(), 2);

        assert_eq!(store.mark_chat_read("c1", "bob").await.unwrap(), 1);
        assert_eq!(store.mark_chat_read("c1", "bob").await.unwrap(), 0);
        assert_eq!(store.count_unread("bob", &chats).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_patches_do_not_clobber() {
        let store = Arc::new(MemoryStore::new());
        let msg = store.insert(new_message("c1", "alice", "hi")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let actor = format!("user-{}", i);
                store
                    .update(msg.id, MessagePatch::react(actor.clone(), "👍"))
                    .await
                    .unwrap();
                store
                    .update(msg.id, MessagePatch::mark_read(actor))
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = store.find_by_id(msg.id).await.unwrap();
        assert_eq!(stored.reactions.len(), 50);
        assert_eq!(stored.read_by.len(), 50);
    }
}
