//! Subscription handles returned by the dispatcher

use std::fmt;

use hangout_store::ChangeEvent;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What a subscriber receives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// A committed change the subscriber is entitled to see
    Change(ChangeEvent),
    /// Changes were dropped for this subscriber; refetch state before trusting it again
    Resync { missed: u64 },
}

/// Cancels a subscription from any task. Cloning shares the same subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    user_id: String,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: Uuid, user_id: &str, token: CancellationToken) -> Self {
        Self {
            id,
            user_id: user_id.to_string(),
            token,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Stop delivery. Calling it again has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Receiving side of a subscription. Dropping it cancels the subscription.
pub struct Subscription {
    events: mpsc::Receiver<RealtimeEvent>,
    handle: SubscriptionHandle,
}

impl Subscription {
    pub(crate) fn new(events: mpsc::Receiver<RealtimeEvent>, handle: SubscriptionHandle) -> Self {
        Self { events, handle }
    }

    /// Next event, or `None` once the subscription is cancelled or the dispatcher stops.
    ///
    /// After cancellation nothing more is returned, even if events were buffered.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        tokio::select! {
            biased;
            _ = self.handle.token.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> Uuid {
        self.handle.id
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .finish()
    }
}
