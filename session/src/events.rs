//! In-process publish/subscribe bus for cross-component session signals.
//!
//! DESIGN
//! ======
//! The bus is an explicit value handed to the gateway and the session
//! manager at construction. Events are typed; subscribers that fall behind
//! see `Lagged` and keep receiving newer events.

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::User;

const DEFAULT_CAPACITY: usize = 64;

/// Signal published on the bus.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// The remote API rejected the token; every holder should drop the session.
    SessionInvalidated { reason: String },
    /// The signed-in user's profile changed locally.
    ProfileUpdated { user: User },
    /// The signed-in user followed or unfollowed someone.
    FollowUpdated { user_id: String, following: bool },
}

impl SessionEvent {
    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInvalidated { .. } => "session_invalidated",
            Self::ProfileUpdated { .. } => "profile_updated",
            Self::FollowUpdated { .. } => "follow_updated",
        }
    }
}

/// Cloneable handle to a broadcast channel of [`SessionEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to all current subscribers. Returns how many received it;
    /// zero subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let kind = event.kind();
        let delivered = self.tx.send(event).unwrap_or(0);
        debug!(event = kind, delivered, "session event published");
        delivered
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
