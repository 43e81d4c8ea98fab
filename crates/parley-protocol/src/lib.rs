//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat messaging core.
//!
//! Sessions talk to the server over length-prefixed MessagePack frames.
//! A session first sends `Connect` with an opaque token, then joins chat
//! rooms, issues requests, and receives lifecycle events for the rooms it
//! has joined.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Session handshake
//! - `Join` / `Leave` - Chat room membership
//! - `Request` / `Reply` / `Error` - Message operations
//! - `Event` - Message lifecycle events pushed to room members
//! - `Ping` / `Pong` - Keepalive
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame, Request};
//!
//! let frame = Frame::request(7, Request::UnreadCount);
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod codes;
pub mod event;
pub mod frames;
pub mod request;
pub mod version;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use event::{ChatEvent, EventKind};
pub use frames::{Frame, FrameType};
pub use request::Request;
pub use version::{Version, PROTOCOL_VERSION};
