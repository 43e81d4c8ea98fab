//! Stable error codes carried by `Frame::Error`.
//!
//! Codes in the 1xxx range are session/protocol failures; 2xxx codes are
//! outcomes of message operations.

/// The frame could not be decoded or was not valid in this state.
pub const INVALID_FRAME: u16 = 1000;
/// The client speaks an incompatible protocol version.
pub const UNSUPPORTED_VERSION: u16 = 1001;
/// The connect token did not resolve to an identity.
pub const UNAUTHENTICATED: u16 = 1002;
/// The session cannot join any more rooms.
pub const ROOM_LIMIT: u16 = 1003;

/// Malformed or missing request fields.
pub const INVALID_INPUT: u16 = 2000;
/// The actor may not perform the operation.
pub const FORBIDDEN: u16 = 2001;
/// The target message does not exist or was deleted.
pub const NOT_FOUND: u16 = 2002;
/// A referenced message is missing from the expected chat.
pub const INVALID_REFERENCE: u16 = 2003;
/// Persistence failure.
pub const INTERNAL: u16 = 2004;
