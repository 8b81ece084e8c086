//! Client-facing surface of the interaction core
//!
//! A caller authenticates once with [`InteractionCore::session`] and then acts
//! through the returned [`Session`], which carries the verified user id into
//! every store call. Notifications triggered by an action are created on
//! spawned tasks: their failure is logged and never fails the action itself.

use std::future::Future;
use std::sync::Arc;

use hangout_store::{
    preview_text, ConversationManager, ConversationSummary, Message, MessageKind, MessagePage,
    MessageStore, NewMessage, Notification, NotificationCenter, NotificationCounts,
    ParticipantRole, ReadLedger, SocialGraph, Store, StoreError, StoreResult, UnreadCounters,
};
use tracing::{debug, warn};

use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{ServiceError, ServiceResult};
use crate::session::SessionVerifier;
use crate::subscription::{RealtimeEvent, Subscription, SubscriptionHandle};

/// Message content as composed by a client, before it is addressed and sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    kind: MessageKind,
    content: String,
    attachment_ref: Option<String>,
    reply_to: Option<String>,
}

impl Draft {
    pub fn text(content: &str) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.to_string(),
            attachment_ref: None,
            reply_to: None,
        }
    }

    pub fn attachment(kind: MessageKind, attachment_ref: &str, caption: &str) -> Self {
        Self {
            kind,
            content: caption.to_string(),
            attachment_ref: Some(attachment_ref.to_string()),
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: &str) -> Self {
        self.reply_to = Some(message_id.to_string());
        self
    }

    fn into_message(self, conversation_id: &str, sender_id: &str) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            kind: self.kind,
            content: self.content,
            attachment_ref: self.attachment_ref,
            reply_to: self.reply_to,
        }
    }
}

struct Inner {
    store: Store,
    conversations: ConversationManager,
    messages: MessageStore,
    ledger: ReadLedger,
    notifications: NotificationCenter,
    graph: Arc<dyn SocialGraph>,
    sessions: Arc<dyn SessionVerifier>,
    dispatcher: Dispatcher,
}

/// Entry point wiring the stores, the dispatcher and the collaborators together
#[derive(Clone)]
pub struct InteractionCore {
    inner: Arc<Inner>,
}

impl InteractionCore {
    pub fn new(
        store: Store,
        graph: Arc<dyn SocialGraph>,
        sessions: Arc<dyn SessionVerifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                conversations: ConversationManager::new(store.clone()),
                messages: MessageStore::new(store.clone()),
                ledger: ReadLedger::new(store.clone()),
                notifications: NotificationCenter::new(store.clone()),
                dispatcher: Dispatcher::new(store.clone(), config),
                store,
                graph,
                sessions,
            }),
        }
    }

    /// Authenticate a caller
    pub async fn session(&self, token: &str) -> ServiceResult<Session> {
        let user_id = self
            .inner
            .sessions
            .verify(token)
            .await
            .ok_or(ServiceError::Unauthenticated)?;

        Ok(Session {
            core: self.clone(),
            user_id,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    fn spawn_side_effect<F>(&self, action: &'static str, work: F)
    where
        F: Future<Output = StoreResult<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = work.await {
                warn!("Failed to {}: {}", action, e);
            }
        });
    }
}

/// An authenticated caller
#[derive(Clone)]
pub struct Session {
    core: InteractionCore,
    user_id: String,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn inner(&self) -> &Inner {
        &self.core.inner
    }

    // Conversations

    pub async fn list_conversations(&self) -> ServiceResult<Vec<ConversationSummary>> {
        Ok(self.inner().conversations.list_for_user(&self.user_id).await?)
    }

    pub async fn create_direct(&self, peer_id: &str) -> ServiceResult<String> {
        Ok(self
            .inner()
            .conversations
            .get_or_create_direct(&self.user_id, peer_id)
            .await?)
    }

    pub async fn create_group(&self, name: &str, member_ids: &[String]) -> ServiceResult<String> {
        Ok(self
            .inner()
            .conversations
            .create_group(&self.user_id, name, member_ids)
            .await?)
    }

    pub async fn add_participant(&self, conversation_id: &str, user_id: &str) -> ServiceResult<bool> {
        Ok(self
            .inner()
            .conversations
            .add_participant(&self.user_id, conversation_id, user_id)
            .await?)
    }

    pub async fn remove_participant(&self, conversation_id: &str, user_id: &str) -> ServiceResult<()> {
        Ok(self
            .inner()
            .conversations
            .remove_participant(&self.user_id, conversation_id, user_id)
            .await?)
    }

    pub async fn leave(&self, conversation_id: &str) -> ServiceResult<()> {
        self.remove_participant(conversation_id, &self.user_id).await
    }

    pub async fn set_role(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> ServiceResult<()> {
        Ok(self
            .inner()
            .conversations
            .set_role(&self.user_id, conversation_id, user_id, role)
            .await?)
    }

    pub async fn rename_group(&self, conversation_id: &str, name: &str) -> ServiceResult<()> {
        Ok(self
            .inner()
            .conversations
            .rename_group(&self.user_id, conversation_id, name)
            .await?)
    }

    // Messages

    /// History page; `limit` defaults to the configured page size
    pub async fn get_messages(
        &self,
        conversation_id: &str,
        limit: Option<u64>,
        before: Option<&str>,
    ) -> ServiceResult<MessagePage> {
        let limit = limit.unwrap_or(self.core.inner.store.config().default_page_size);
        Ok(self
            .inner()
            .messages
            .page(conversation_id, &self.user_id, limit, before)
            .await?)
    }

    /// Send a message; every other participant is notified in the background
    pub async fn send_message(&self, conversation_id: &str, draft: Draft) -> ServiceResult<Message> {
        let message = self
            .inner()
            .messages
            .append(draft.into_message(conversation_id, &self.user_id))
            .await?;

        let conversations = self.inner().conversations.clone();
        let notifications = self.inner().notifications.clone();
        let preview = preview_text(
            message.kind,
            &message.content,
            self.inner().store.config().preview_chars,
        );
        let sent = message.clone();

        self.core.spawn_side_effect("notify message recipients", async move {
            for participant in conversations.participants(&sent.conversation_id).await? {
                if participant.user_id == sent.sender_id {
                    continue;
                }
                if let Err(e) = notifications
                    .notify_message(
                        &participant.user_id,
                        &sent.conversation_id,
                        &sent.sender_id,
                        &preview,
                    )
                    .await
                {
                    warn!(
                        "Failed to notify {} of message {}: {}",
                        participant.user_id, sent.id, e
                    );
                }
            }
            Ok(())
        });

        Ok(message)
    }

    pub async fn edit_message(&self, message_id: &str, content: &str) -> ServiceResult<Message> {
        Ok(self
            .inner()
            .messages
            .edit(message_id, &self.user_id, content)
            .await?)
    }

    pub async fn delete_message(&self, message_id: &str) -> ServiceResult<()> {
        Ok(self
            .inner()
            .messages
            .delete(message_id, &self.user_id)
            .await?)
    }

    // Read state

    pub async fn mark_read(&self, message_ids: &[String]) -> ServiceResult<u64> {
        Ok(self
            .inner()
            .ledger
            .mark_read(&self.user_id, message_ids)
            .await?)
    }

    pub async fn mark_conversation_read(&self, conversation_id: &str) -> ServiceResult<u64> {
        Ok(self
            .inner()
            .ledger
            .mark_conversation_read(&self.user_id, conversation_id)
            .await?)
    }

    pub async fn get_counts(&self) -> ServiceResult<UnreadCounters> {
        Ok(self.inner().ledger.counts(&self.user_id).await?)
    }

    pub async fn notification_counts(&self) -> ServiceResult<NotificationCounts> {
        Ok(self.inner().ledger.notification_counts(&self.user_id).await?)
    }

    // Notifications

    /// Newest-first notifications; `limit` defaults to the configured page size
    pub async fn list_notifications(
        &self,
        limit: Option<u64>,
        before: Option<&str>,
    ) -> ServiceResult<Vec<Notification>> {
        let limit = limit.unwrap_or(self.core.inner.store.config().default_page_size);
        Ok(self
            .inner()
            .notifications
            .list(&self.user_id, limit, before)
            .await?)
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> ServiceResult<bool> {
        Ok(self
            .inner()
            .ledger
            .mark_notification_read(&self.user_id, notification_id)
            .await?)
    }

    pub async fn mark_all_read(&self) -> ServiceResult<u64> {
        Ok(self
            .inner()
            .ledger
            .mark_all_notifications_read(&self.user_id)
            .await?)
    }

    pub async fn delete_notification(&self, notification_id: &str) -> ServiceResult<()> {
        Ok(self
            .inner()
            .notifications
            .delete(&self.user_id, notification_id)
            .await?)
    }

    pub async fn pending_follow_requests(&self) -> ServiceResult<Vec<Notification>> {
        Ok(self
            .inner()
            .notifications
            .pending_follow_requests(&self.user_id)
            .await?)
    }

    // Social actions

    /// Follow `followee_id`, who is then notified in the background
    pub async fn follow(&self, followee_id: &str) -> ServiceResult<()> {
        if followee_id.is_empty() || followee_id == self.user_id {
            return Err(StoreError::Validation(format!(
                "{} cannot follow '{}'",
                self.user_id, followee_id
            ))
            .into());
        }

        self.inner().graph.follow(&self.user_id, followee_id).await?;

        let notifications = self.inner().notifications.clone();
        let graph = self.inner().graph.clone();
        let follower = self.user_id.clone();
        let followee = followee_id.to_string();
        self.core.spawn_side_effect("notify follow", async move {
            // Skip follows undone before the notification went out
            if graph.is_following(&follower, &followee).await? {
                notifications.notify_follow(&followee, &follower).await?;
            }
            Ok(())
        });
        Ok(())
    }

    /// Stop following `followee_id`, withdrawing a follow request they have not decided on.
    ///
    /// Returns whether the follow existed.
    pub async fn unfollow(&self, followee_id: &str) -> ServiceResult<bool> {
        Ok(self.inner().graph.unfollow(&self.user_id, followee_id).await?)
    }

    /// Accept or decline a pending follow from `follower_id`
    pub async fn respond_to_follow(&self, follower_id: &str, accept: bool) -> ServiceResult<()> {
        Ok(self
            .inner()
            .notifications
            .respond_to_follow(&self.user_id, follower_id, accept, self.inner().graph.as_ref())
            .await?)
    }

    /// Report a like on a post owned by `owner_id`. Posts themselves live outside the core.
    pub async fn record_like(&self, owner_id: &str, post_id: &str) -> ServiceResult<()> {
        require_ids(owner_id, post_id)?;

        let notifications = self.inner().notifications.clone();
        let (owner, actor, post) = (owner_id.to_string(), self.user_id.clone(), post_id.to_string());
        self.core.spawn_side_effect("notify like", async move {
            notifications.notify_like(&owner, &actor, &post).await?;
            Ok(())
        });
        Ok(())
    }

    /// Report a comment on a post owned by `owner_id`
    pub async fn record_comment(
        &self,
        owner_id: &str,
        post_id: &str,
        excerpt: &str,
    ) -> ServiceResult<()> {
        require_ids(owner_id, post_id)?;

        let notifications = self.inner().notifications.clone();
        let (owner, actor, post) = (owner_id.to_string(), self.user_id.clone(), post_id.to_string());
        let excerpt = excerpt.to_string();
        self.core.spawn_side_effect("notify comment", async move {
            notifications
                .notify_comment(&owner, &actor, &post, &excerpt)
                .await?;
            Ok(())
        });
        Ok(())
    }

    // Real-time

    pub async fn subscribe(&self) -> ServiceResult<Subscription> {
        self.inner().dispatcher.subscribe(&self.user_id).await
    }

    pub async fn subscribe_with<F>(&self, on_event: F) -> ServiceResult<SubscriptionHandle>
    where
        F: FnMut(RealtimeEvent) + Send + 'static,
    {
        self.inner()
            .dispatcher
            .subscribe_with(&self.user_id, on_event)
            .await
    }

    /// Cancel one of this caller's subscriptions
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> ServiceResult<()> {
        if handle.user_id() != self.user_id {
            return Err(StoreError::PermissionDenied(format!(
                "subscription {} belongs to another user",
                handle.id()
            ))
            .into());
        }
        self.inner().dispatcher.unsubscribe(handle);
        debug!("{} unsubscribed {}", self.user_id, handle.id());
        Ok(())
    }
}

fn require_ids(owner_id: &str, post_id: &str) -> ServiceResult<()> {
    if owner_id.is_empty() || post_id.is_empty() {
        return Err(StoreError::Validation("owner and post ids must not be empty".into()).into());
    }
    Ok(())
}
