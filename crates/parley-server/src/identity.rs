//! Session identity resolution.
//!
//! The `connect` frame carries an opaque token; the resolver decides which
//! actor the session speaks for. Every later operation acts as that actor.

use crate::config::IdentityConfig;
use async_trait::async_trait;
use std::collections::HashMap;

/// The actor a session is authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub actor_id: String,
    pub display_name: Option<String>,
}

/// Maps session tokens to identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a token. `None` means the session must be refused.
    async fn resolve(&self, token: &str) -> Option<Identity>;
}

/// Token table loaded from configuration.
#[derive(Debug, Default)]
pub struct ConfigIdentities {
    tokens: HashMap<String, Identity>,
}

impl ConfigIdentities {
    #[must_use]
    pub fn from_config(entries: &[IdentityConfig]) -> Self {
        let tokens = entries
            .iter()
            .map(|entry| {
                (
                    entry.token.clone(),
                    Identity {
                        actor_id: entry.actor_id.clone(),
                        display_name: entry.display_name.clone(),
                    },
                )
            })
            .collect();
        Self { tokens }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for ConfigIdentities {
    async fn resolve(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}
