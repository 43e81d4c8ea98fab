//! # parley-core
//!
//! Message lifecycle, authorization and live fan-out for Parley chats.
//!
//! - **Store** - persistence port for messages, with an in-memory adapter
//! - **Guard** - chat membership and authorship checks
//! - **Service** - the single entry point for every message operation
//! - **Router** - rooms of live sessions, one per open chat
//! - **Broadcast** - ordered, best-effort delivery of lifecycle events
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Request   │────▶│   Service   │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │ Broadcaster │────▶│   Router    │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod broadcast;
pub mod emoji;
pub mod error;
pub mod guard;
pub mod memory;
pub mod message;
pub mod room;
pub mod router;
pub mod service;
pub mod store;

pub use broadcast::{BroadcastError, Broadcaster, RealtimeBroadcaster};
pub use emoji::{EmojiPolicy, GraphemeEmojiPolicy};
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use guard::{AuthorizationGuard, ChatDirectory, DirectoryError, MembershipGuard, MemoryDirectory};
pub use memory::MemoryStore;
pub use message::{
    ActorId, ChatId, EditRecord, Message, MessageId, MessageKind, Page, Tombstone,
};
pub use room::Room;
pub use router::{RoomRouter, RouterConfig, RouterError, RouterStats};
pub use service::{MessageService, SendMessage};
pub use store::{MessagePatch, MessageStore, StoreError, StoreResult};
