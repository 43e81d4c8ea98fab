//! Realtime fan-out of message lifecycle events.
//!
//! The service hands events to a [`Broadcaster`] after the causing mutation
//! is durable. [`RealtimeBroadcaster`] only enqueues on the caller's path;
//! a single dispatcher task drains the queue into the [`RoomRouter`], so
//! events leave in the order they were published.

use crate::router::RoomRouter;
use parley_protocol::ChatEvent;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Broadcast errors.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The broadcaster has been shut down.
    #[error("Broadcaster is shut down")]
    Closed,
}

/// Publishes lifecycle events to the sessions viewing a chat.
///
/// Delivery is best-effort and at most once per session. Implementations
/// must not block beyond enqueueing.
pub trait Broadcaster: Send + Sync {
    /// Queue an event for fan-out.
    ///
    /// # Errors
    ///
    /// Fails only when the broadcaster can no longer accept events.
    fn publish(&self, event: ChatEvent) -> Result<(), BroadcastError>;
}

/// Queue-backed broadcaster with an explicit start/shutdown lifecycle.
pub struct RealtimeBroadcaster {
    queue: RwLock<Option<mpsc::UnboundedSender<ChatEvent>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeBroadcaster {
    /// Start the dispatcher task. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(router: Arc<RoomRouter>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(router, rx));
        info!("Realtime broadcaster started");

        Self {
            queue: RwLock::new(Some(tx)),
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.queue
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop accepting events, deliver what is already queued, and wait for
    /// the dispatcher to exit. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let queue = self
            .queue
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(queue);

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Broadcast dispatcher ended abnormally");
            }
            info!("Realtime broadcaster stopped");
        }
    }
}

impl Broadcaster for RealtimeBroadcaster {
    fn publish(&self, event: ChatEvent) -> Result<(), BroadcastError> {
        let queue = self.queue.read().unwrap_or_else(PoisonError::into_inner);
        let tx = queue.as_ref().ok_or(BroadcastError::Closed)?;
        tx.send(event).map_err(|_| BroadcastError::Closed)
    }
}

async fn dispatch(router: Arc<RoomRouter>, mut rx: mpsc::UnboundedReceiver<ChatEvent>) {
    let mut dispatched: u64 = 0;
    while let Some(event) = rx.recv().await {
        let recipients = router.publish(event);
        dispatched += 1;
        trace!(recipients, "Dispatched event");
    }
    debug!(dispatched, "Broadcast queue drained");
}
