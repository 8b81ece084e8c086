//! Real-time dispatcher - fans committed changes out to scoped subscribers
//!
//! Every subscription owns a pump task with its own receiver on the store's
//! change feed. The pump filters by scope and version and forwards into a
//! bounded per-subscriber buffer. A subscriber that cannot keep up loses
//! events and is told so with a single [`RealtimeEvent::Resync`]; it never
//! slows the publisher or any other subscriber.

use std::collections::HashMap;
use std::sync::Arc;

use hangout_store::{ChangeEvent, ChangeFeed, ConversationManager, Store};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::filter::SubscriberFilter;
use crate::subscription::{RealtimeEvent, Subscription, SubscriptionHandle};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Events buffered per subscriber before it is considered slow (default: 256)
    pub subscriber_buffer: usize,

    /// Entities whose latest version each subscriber remembers (default: 4096)
    pub version_window: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            version_window: 4096,
        }
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

/// Real-time dispatcher. Cheap to clone; clones share subscriptions.
#[derive(Clone)]
pub struct Dispatcher {
    feed: ChangeFeed,
    conversations: ConversationManager,
    config: DispatcherConfig,
    live: Registry,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(store: Store, config: DispatcherConfig) -> Self {
        Self {
            feed: store.feed().clone(),
            conversations: ConversationManager::new(store),
            config,
            live: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start receiving the changes `user_id` is entitled to.
    ///
    /// Only changes committed after this call are delivered; there is no replay.
    pub async fn subscribe(&self, user_id: &str) -> ServiceResult<Subscription> {
        if self.shutdown.is_cancelled() {
            return Err(ServiceError::Closed);
        }

        // Listen before reading the scope so no change falls between the two
        let upstream = self.feed.subscribe();
        let conversation_ids = self.conversations.conversation_ids_for(user_id).await?;

        let id = Uuid::new_v4();
        let token = self.shutdown.child_token();
        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        self.live.lock().insert(id, token.clone());

        let filter = SubscriberFilter::new(user_id, conversation_ids, self.config.version_window);
        let pump = Pump {
            id,
            upstream,
            filter,
            sender,
            token: token.clone(),
            conversations: self.conversations.clone(),
            live: self.live.clone(),
        };
        tokio::spawn(pump.run());

        info!("Subscription {} opened for {}", id, user_id);
        Ok(Subscription::new(
            receiver,
            SubscriptionHandle::new(id, user_id, token),
        ))
    }

    /// Callback form of [`Dispatcher::subscribe`]; `on_event` runs on a spawned task
    pub async fn subscribe_with<F>(
        &self,
        user_id: &str,
        mut on_event: F,
    ) -> ServiceResult<SubscriptionHandle>
    where
        F: FnMut(RealtimeEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe(user_id).await?;
        let handle = subscription.handle();

        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                on_event(event);
            }
        });

        Ok(handle)
    }

    /// Cancel a subscription. Unknown or already cancelled handles are ignored.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(token) = self.live.lock().remove(&handle.id()) {
            token.cancel();
            debug!("Subscription {} cancelled", handle.id());
        }
        handle.cancel();
    }

    pub fn active_subscriptions(&self) -> usize {
        self.live.lock().len()
    }

    /// Cancel every subscription and refuse new ones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.live.lock().clear();
        info!("Dispatcher shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Forwarding task of one subscription
struct Pump {
    id: Uuid,
    upstream: broadcast::Receiver<ChangeEvent>,
    filter: SubscriberFilter,
    sender: mpsc::Sender<RealtimeEvent>,
    token: CancellationToken,
    conversations: ConversationManager,
    live: Registry,
}

impl Pump {
    async fn run(mut self) {
        // Events dropped since the last delivered resync
        let mut missed: u64 = 0;

        loop {
            let mut reload = false;
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                permit = self.sender.reserve(), if missed > 0 => match permit {
                    Ok(permit) => {
                        debug!("Subscription {} resyncing after {} missed events", self.id, missed);
                        permit.send(RealtimeEvent::Resync { missed });
                        missed = 0;
                    }
                    Err(_) => break,
                },
                received = self.upstream.recv() => match received {
                    Ok(event) => {
                        if !self.filter.admit(&event) {
                            continue;
                        }
                        if missed > 0 {
                            // Already covered by the pending resync
                            missed += 1;
                            continue;
                        }
                        match self.sender.try_send(RealtimeEvent::Change(event)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!(
                                    "Subscription {} of {} is full, dropping events until it drains",
                                    self.id,
                                    self.filter.user_id()
                                );
                                missed = 1;
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Subscription {} lagged behind by {} changes", self.id, skipped);
                        missed += skipped.max(1);
                        reload = true;
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            if reload {
                self.reload_scope().await;
            }
        }

        self.live.lock().remove(&self.id);
        debug!("Subscription {} closed", self.id);
    }

    /// Skipped changes may include the subscriber's own roster changes
    async fn reload_scope(&mut self) {
        match self
            .conversations
            .conversation_ids_for(self.filter.user_id())
            .await
        {
            Ok(ids) => self.filter.reset_scope(ids),
            Err(e) => warn!(
                "Failed to reload conversations of {}: {}",
                self.filter.user_id(),
                e
            ),
        }
    }
}
