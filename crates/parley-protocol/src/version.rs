//! Protocol versioning for Parley.
//!
//! Clients announce only a major version in `Connect`; the server accepts
//! any client that shares its major version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check a client's announced major version against this one.
    ///
    /// Returns the version the session will speak, or `None` if the
    /// client must be turned away.
    #[must_use]
    pub fn negotiate(&self, client_major: u8) -> Option<Version> {
        (client_major == self.major).then_some(*self)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
