//! Notification center - typed notifications produced by follows, messages, likes and comments

use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change_feed::{ChangeEvent, ChangeOp, ChangeRow};
use crate::entities::notifications;
use crate::error::{StoreError, StoreResult};
use crate::events::{Notification, NotificationKind, NotificationPayload};
use crate::profile_directory::ProfileDirectory;
use crate::social_graph::SocialGraph;
use crate::{now_millis, truncate_chars, Store};

/// Notification center
#[derive(Clone)]
pub struct NotificationCenter {
    store: Store,
    profiles: ProfileDirectory,
}

impl NotificationCenter {
    pub fn new(store: Store) -> Self {
        Self {
            profiles: ProfileDirectory::new(store.clone()),
            store,
        }
    }

    /// Tell `recipient_id` that `follower_id` started following them.
    ///
    /// While an undecided follow notification for the same pair exists, no second one is created.
    pub async fn notify_follow(
        &self,
        recipient_id: &str,
        follower_id: &str,
    ) -> StoreResult<Option<Notification>> {
        let pending = self.pending_follow_models(recipient_id, follower_id).await?;
        if !pending.is_empty() {
            debug!(
                "Follow notification from {} to {} already pending",
                follower_id, recipient_id
            );
            return Ok(None);
        }

        self.create(
            recipient_id,
            NotificationPayload::Follow {
                follower_id: follower_id.to_string(),
            },
        )
        .await
    }

    pub async fn notify_message(
        &self,
        recipient_id: &str,
        conversation_id: &str,
        sender_id: &str,
        preview: &str,
    ) -> StoreResult<Option<Notification>> {
        self.create(
            recipient_id,
            NotificationPayload::Message {
                conversation_id: conversation_id.to_string(),
                sender_id: sender_id.to_string(),
                preview: truncate_chars(preview, self.store.config.preview_chars),
            },
        )
        .await
    }

    pub async fn notify_like(
        &self,
        recipient_id: &str,
        actor_id: &str,
        post_id: &str,
    ) -> StoreResult<Option<Notification>> {
        self.create(
            recipient_id,
            NotificationPayload::Like {
                post_id: post_id.to_string(),
                actor_id: actor_id.to_string(),
            },
        )
        .await
    }

    pub async fn notify_comment(
        &self,
        recipient_id: &str,
        actor_id: &str,
        post_id: &str,
        excerpt: &str,
    ) -> StoreResult<Option<Notification>> {
        self.create(
            recipient_id,
            NotificationPayload::Comment {
                post_id: post_id.to_string(),
                actor_id: actor_id.to_string(),
                excerpt: truncate_chars(excerpt, self.store.config.preview_chars),
            },
        )
        .await
    }

    /// Store a notification. Returns `None` when the recipient is the actor.
    async fn create(
        &self,
        recipient_id: &str,
        payload: NotificationPayload,
    ) -> StoreResult<Option<Notification>> {
        let actor_id = payload.actor_id().to_string();
        if actor_id == recipient_id {
            debug!(
                "Skipping {} notification to self for {}",
                payload.kind().as_str(),
                recipient_id
            );
            return Ok(None);
        }

        let actor_name = self.profiles.display_name(&actor_id).await?;
        let (title, body) = render(&payload, &actor_name);

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            recipient_id: recipient_id.to_string(),
            kind: payload.kind(),
            title,
            body,
            payload,
            created_at: now_millis(),
            is_read: false,
            read_at: None,
        };

        let model = notifications::ActiveModel {
            id: Set(notification.id.clone()),
            recipient_id: Set(notification.recipient_id.clone()),
            kind: Set(notification.kind.as_str().to_string()),
            actor_id: Set(Some(actor_id)),
            title: Set(notification.title.clone()),
            body: Set(notification.body.clone()),
            payload_json: Set(serde_json::to_string(&notification.payload)?),
            created_at: Set(notification.created_at),
            is_read: Set(false),
            read_at: Set(None),
        };

        notifications::Entity::insert(model)
            .exec_without_returning(&self.store.db)
            .await?;

        debug!(
            "Created {} notification {} for {}",
            notification.kind.as_str(),
            notification.id,
            recipient_id
        );
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            ChangeRow::Notification(notification.clone()),
            notification.created_at,
        ));

        Ok(Some(notification))
    }

    /// Accept or decline a pending follow from `follower_id`.
    ///
    /// The pending notification is removed first, so only one decision per
    /// request takes effect. Accepting then makes `recipient_id` follow back;
    /// if that fails the notification is put back and the request stays pending.
    pub async fn respond_to_follow(
        &self,
        recipient_id: &str,
        follower_id: &str,
        accept: bool,
        graph: &dyn SocialGraph,
    ) -> StoreResult<()> {
        let pending = self.pending_follow_models(recipient_id, follower_id).await?;
        if pending.is_empty() {
            return Err(StoreError::NotFound(format!(
                "pending follow from {} to {}",
                follower_id, recipient_id
            )));
        }

        let ids: Vec<String> = pending.iter().map(|n| n.id.clone()).collect();
        let result = notifications::Entity::delete_many()
            .filter(notifications::Column::Id.is_in(ids))
            .filter(notifications::Column::RecipientId.eq(recipient_id))
            .exec(&self.store.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(format!(
                "pending follow from {} to {}",
                follower_id, recipient_id
            )));
        }

        if accept {
            match follow_back(graph, recipient_id, follower_id).await {
                Ok(true) => {}
                Ok(false) => {
                    // The follow was undone before the decision
                    self.publish_withdrawn(pending)?;
                    return Err(StoreError::NotFound(format!(
                        "follow from {} to {} was withdrawn",
                        follower_id, recipient_id
                    )));
                }
                Err(e) => {
                    warn!(
                        "Failed to accept follow from {} to {}: {}",
                        follower_id, recipient_id, e
                    );
                    self.restore(pending).await;
                    return Err(e);
                }
            }
        }

        self.publish_withdrawn(pending)?;

        info!(
            "{} {} follow from {}",
            recipient_id,
            if accept { "accepted" } else { "declined" },
            follower_id
        );
        Ok(())
    }

    /// Newest-first notifications of a recipient, optionally older than `before`
    pub async fn list(
        &self,
        recipient_id: &str,
        limit: u64,
        before: Option<&str>,
    ) -> StoreResult<Vec<Notification>> {
        if limit == 0 {
            return Err(StoreError::Validation("page limit must be positive".into()));
        }
        let limit = limit.min(self.store.config.max_page_size);

        let mut query = notifications::Entity::find()
            .filter(notifications::Column::RecipientId.eq(recipient_id));

        if let Some(cursor_id) = before {
            let cursor = notifications::Entity::find_by_id(cursor_id.to_string())
                .one(&self.store.db)
                .await?
                .filter(|n| n.recipient_id == recipient_id)
                .ok_or_else(|| StoreError::NotFound(format!("notification {}", cursor_id)))?;

            query = query.filter(
                Condition::any()
                    .add(notifications::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(notifications::Column::CreatedAt.eq(cursor.created_at))
                            .add(notifications::Column::Id.lt(cursor.id)),
                    ),
            );
        }

        query
            .order_by_desc(notifications::Column::CreatedAt)
            .order_by_desc(notifications::Column::Id)
            .limit(limit)
            .all(&self.store.db)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    /// Follow notifications still waiting for a decision
    pub async fn pending_follow_requests(
        &self,
        recipient_id: &str,
    ) -> StoreResult<Vec<Notification>> {
        notifications::Entity::find()
            .filter(notifications::Column::RecipientId.eq(recipient_id))
            .filter(notifications::Column::Kind.eq(NotificationKind::Follow.as_str()))
            .order_by_desc(notifications::Column::CreatedAt)
            .all(&self.store.db)
            .await?
            .into_iter()
            .map(Notification::try_from)
            .collect()
    }

    /// Delete one of the recipient's notifications
    pub async fn delete(&self, recipient_id: &str, notification_id: &str) -> StoreResult<()> {
        let model = notifications::Entity::find_by_id(notification_id.to_string())
            .one(&self.store.db)
            .await?
            .filter(|n| n.recipient_id == recipient_id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", notification_id)))?;

        let result = notifications::Entity::delete_many()
            .filter(notifications::Column::Id.eq(notification_id))
            .filter(notifications::Column::RecipientId.eq(recipient_id))
            .exec(&self.store.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("notification {}", notification_id)));
        }

        debug!("Deleted notification {}", notification_id);
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Delete,
            ChangeRow::Notification(Notification::try_from(model)?),
            i64::MAX,
        ));
        Ok(())
    }

    fn publish_withdrawn(&self, models: Vec<notifications::Model>) -> StoreResult<()> {
        for model in models {
            self.store.feed.publish(ChangeEvent::new(
                ChangeOp::Delete,
                ChangeRow::Notification(Notification::try_from(model)?),
                i64::MAX,
            ));
        }
        Ok(())
    }

    /// Re-insert notifications claimed by a decision that did not go through
    async fn restore(&self, models: Vec<notifications::Model>) {
        let count = models.len();
        let result = notifications::Entity::insert_many(
            models
                .into_iter()
                .map(|model| notifications::ActiveModel::from(model).reset_all()),
        )
        .on_conflict(
            OnConflict::column(notifications::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(&self.store.db)
        .await;

        match result {
            Ok(restored) => debug!("Restored {} of {} follow notifications", restored, count),
            Err(e) => warn!("Failed to restore follow notifications: {}", e),
        }
    }

    async fn pending_follow_models(
        &self,
        recipient_id: &str,
        follower_id: &str,
    ) -> StoreResult<Vec<notifications::Model>> {
        Ok(notifications::Entity::find()
            .filter(notifications::Column::RecipientId.eq(recipient_id))
            .filter(notifications::Column::Kind.eq(NotificationKind::Follow.as_str()))
            .filter(notifications::Column::ActorId.eq(follower_id))
            .all(&self.store.db)
            .await?)
    }
}

/// Make `recipient_id` follow `follower_id` back, unless that follow no longer exists
async fn follow_back(
    graph: &dyn SocialGraph,
    recipient_id: &str,
    follower_id: &str,
) -> StoreResult<bool> {
    if !graph.is_following(follower_id, recipient_id).await? {
        return Ok(false);
    }
    graph.follow(recipient_id, follower_id).await?;
    Ok(true)
}

/// Remove undecided follow notifications of a pair, returning the removed rows
pub(crate) async fn withdraw_follow_requests<C: ConnectionTrait>(
    db: &C,
    recipient_id: &str,
    follower_id: &str,
) -> StoreResult<Vec<notifications::Model>> {
    let pending = notifications::Entity::find()
        .filter(notifications::Column::RecipientId.eq(recipient_id))
        .filter(notifications::Column::Kind.eq(NotificationKind::Follow.as_str()))
        .filter(notifications::Column::ActorId.eq(follower_id))
        .all(db)
        .await?;

    if !pending.is_empty() {
        notifications::Entity::delete_many()
            .filter(notifications::Column::Id.is_in(pending.iter().map(|n| n.id.clone())))
            .exec(db)
            .await?;
    }
    Ok(pending)
}

/// Title and body shown to the recipient
fn render(payload: &NotificationPayload, actor_name: &str) -> (String, String) {
    match payload {
        NotificationPayload::Follow { .. } => (
            "New follower".to_string(),
            format!("{} started following you", actor_name),
        ),
        NotificationPayload::Message { preview, .. } => (actor_name.to_string(), preview.clone()),
        NotificationPayload::Like { .. } => (
            "New like".to_string(),
            format!("{} liked your post", actor_name),
        ),
        NotificationPayload::Comment { excerpt, .. } => (
            "New comment".to_string(),
            format!("{} commented: {}", actor_name, excerpt),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_actor_name() {
        let (title, body) = render(
            &NotificationPayload::Follow {
                follower_id: "u1".into(),
            },
            "Ada",
        );
        assert_eq!(title, "New follower");
        assert_eq!(body, "Ada started following you");
    }

    #[test]
    fn test_message_title_is_sender() {
        let (title, body) = render(
            &NotificationPayload::Message {
                conversation_id: "c1".into(),
                sender_id: "u1".into(),
                preview: "see you".into(),
            },
            "Ada",
        );
        assert_eq!(title, "Ada");
        assert_eq!(body, "see you");
    }
}
