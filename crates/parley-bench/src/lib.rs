//! Shared fixtures for the Parley benchmarks.

use parley_core::{
    MemoryDirectory, MemoryStore, MessageService, RealtimeBroadcaster, RoomRouter, SendMessage,
};
use parley_protocol::{ChatEvent, EventKind};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Chat used by every fixture.
pub const CHAT: &str = "bench";

/// A runtime plus a service whose chat has `participants` members named
/// `user-0`, `user-1`, ...
pub struct Fixture {
    pub runtime: Runtime,
    pub service: MessageService,
    pub router: Arc<RoomRouter>,
}

impl Fixture {
    /// # Panics
    ///
    /// Panics if the runtime cannot be built.
    #[must_use]
    pub fn new(participants: usize) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to build runtime");

        let router = Arc::new(RoomRouter::new());
        let broadcaster = {
            let _context = runtime.enter();
            Arc::new(RealtimeBroadcaster::start(router.clone()))
        };

        let directory = Arc::new(MemoryDirectory::new());
        directory.set_chat(CHAT, (0..participants.max(1)).map(user));

        let service = MessageService::new(Arc::new(MemoryStore::new()), directory, broadcaster);
        Self {
            runtime,
            service,
            router,
        }
    }

    /// Send `count` messages from `user-0`.
    ///
    /// # Panics
    ///
    /// Panics if a send fails.
    pub fn seed(&self, count: usize) {
        self.runtime.block_on(async {
            for i in 0..count {
                self.service
                    .create_message(SendMessage::text(CHAT, user(0), format!("message {}", i)))
                    .await
                    .expect("seed message");
            }
        });
    }
}

/// Participant name for index `i`.
#[must_use]
pub fn user(i: usize) -> String {
    format!("user-{}", i)
}

/// A representative `message:new` event.
#[must_use]
pub fn sample_event(content_len: usize) -> ChatEvent {
    ChatEvent::new(EventKind::Created, CHAT, 42, user(0), 1_700_000_000_000)
        .with_content("x".repeat(content_len))
}
