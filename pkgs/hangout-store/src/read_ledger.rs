//! Read-state ledger - read marks for messages, read flags for notifications
//!
//! Nothing here caches a counter. Every count is computed from the
//! `read_marks` and `notifications` rows at the moment it is asked for.

use std::collections::{BTreeMap, HashMap};

use sea_orm::sea_query::{Expr, OnConflict, Query};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Select,
    Set,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::change_feed::{ChangeEvent, ChangeOp, ChangeRow};
use crate::entities::{messages, notifications, participants, read_marks};
use crate::error::{StoreError, StoreResult};
use crate::events::{Notification, NotificationKind};
use crate::{now_millis, Store};

/// Unread notifications of one recipient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NotificationCounts {
    pub total: u64,
    /// Every kind is present, with zero for kinds without unread notifications
    pub by_kind: BTreeMap<NotificationKind, u64>,
}

/// Badge counters for one user
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UnreadCounters {
    pub notifications: u64,
    pub unread_messages: u64,
    pub unread_conversations: u64,
}

/// Read-state ledger
#[derive(Clone)]
pub struct ReadLedger {
    store: Store,
}

impl ReadLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record that `user_id` has read the given messages, returning how many marks were new.
    ///
    /// Ids the user sent, ids outside the user's conversations and ids already
    /// marked are skipped silently.
    pub async fn mark_read(&self, user_id: &str, message_ids: &[String]) -> StoreResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let readable: Vec<String> = messages::Entity::find()
            .select_only()
            .column(messages::Column::Id)
            .filter(messages::Column::Id.is_in(message_ids.iter().cloned()))
            .filter(messages::Column::SenderId.ne(user_id))
            .filter(messages::Column::ConversationId.in_subquery(conversations_of(user_id)))
            .into_tuple()
            .all(&self.store.db)
            .await?;

        self.insert_marks(user_id, readable).await
    }

    /// Mark every unread message of one conversation as read
    pub async fn mark_conversation_read(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> StoreResult<u64> {
        let membership =
            participants::Entity::find_by_id((conversation_id.to_string(), user_id.to_string()))
                .one(&self.store.db)
                .await?;
        if membership.is_none() {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a participant of {}",
                user_id, conversation_id
            )));
        }

        let unread: Vec<String> = unread_messages(user_id)
            .select_only()
            .column(messages::Column::Id)
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .into_tuple()
            .all(&self.store.db)
            .await?;

        self.insert_marks(user_id, unread).await
    }

    async fn insert_marks(&self, user_id: &str, message_ids: Vec<String>) -> StoreResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let read_at = now_millis();
        let marks = message_ids.iter().map(|id| read_marks::ActiveModel {
            message_id: Set(id.clone()),
            user_id: Set(user_id.to_string()),
            read_at: Set(read_at),
        });

        let inserted = read_marks::Entity::insert_many(marks)
            .on_conflict(
                OnConflict::columns([read_marks::Column::MessageId, read_marks::Column::UserId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.store.db)
            .await?;

        if inserted == 0 {
            debug!("{} had already read all {} messages", user_id, message_ids.len());
            return Ok(0);
        }

        debug!("{} read {} messages", user_id, inserted);
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            ChangeRow::ReadMarks {
                user_id: user_id.to_string(),
                message_ids,
            },
            read_at,
        ));
        Ok(inserted)
    }

    /// Messages in the user's conversations, sent by others, without a read mark
    pub async fn unread_message_count(&self, user_id: &str) -> StoreResult<u64> {
        Ok(unread_messages(user_id).count(&self.store.db).await?)
    }

    /// Unread message count per conversation; conversations with nothing unread are absent
    pub async fn unread_by_conversation(&self, user_id: &str) -> StoreResult<HashMap<String, u64>> {
        unread_by_conversation(&self.store.db, user_id).await
    }

    /// Mark one notification read. Returns false when it already was.
    pub async fn mark_notification_read(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> StoreResult<bool> {
        let model = notifications::Entity::find_by_id(notification_id.to_string())
            .one(&self.store.db)
            .await?
            .filter(|n| n.recipient_id == user_id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", notification_id)))?;

        if model.is_read {
            return Ok(false);
        }

        let read_at = now_millis().max(model.created_at + 1);
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::IsRead, Expr::value(true))
            .col_expr(notifications::Column::ReadAt, Expr::value(read_at))
            .filter(notifications::Column::Id.eq(notification_id))
            .filter(notifications::Column::RecipientId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .exec(&self.store.db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        let mut notification = Notification::try_from(model)?;
        notification.is_read = true;
        notification.read_at = Some(read_at);

        debug!("Notification {} read by {}", notification_id, user_id);
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Update,
            ChangeRow::Notification(notification),
            read_at,
        ));
        Ok(true)
    }

    /// Mark every unread notification of the user read in one statement
    pub async fn mark_all_notifications_read(&self, user_id: &str) -> StoreResult<u64> {
        let read_at = now_millis();
        let result = notifications::Entity::update_many()
            .col_expr(notifications::Column::IsRead, Expr::value(true))
            .col_expr(notifications::Column::ReadAt, Expr::value(read_at))
            .filter(notifications::Column::RecipientId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .exec(&self.store.db)
            .await?;

        if result.rows_affected > 0 {
            info!(
                "Marked {} notifications read for {}",
                result.rows_affected, user_id
            );
            self.store.feed.publish(ChangeEvent::new(
                ChangeOp::Update,
                ChangeRow::NotificationsRead {
                    recipient_id: user_id.to_string(),
                    read_at,
                },
                read_at,
            ));
        }

        Ok(result.rows_affected)
    }

    pub async fn notification_counts(&self, user_id: &str) -> StoreResult<NotificationCounts> {
        let rows: Vec<(String, i64)> = notifications::Entity::find()
            .select_only()
            .column(notifications::Column::Kind)
            .column_as(notifications::Column::Id.count(), "unread")
            .filter(notifications::Column::RecipientId.eq(user_id))
            .filter(notifications::Column::IsRead.eq(false))
            .group_by(notifications::Column::Kind)
            .into_tuple()
            .all(&self.store.db)
            .await?;

        let mut counts = NotificationCounts {
            total: 0,
            by_kind: NotificationKind::ALL.iter().map(|k| (*k, 0)).collect(),
        };
        for (kind, unread) in rows {
            let unread = unread.max(0) as u64;
            counts.by_kind.insert(NotificationKind::parse(&kind)?, unread);
            counts.total += unread;
        }

        Ok(counts)
    }

    /// All badge counters at once
    pub async fn counts(&self, user_id: &str) -> StoreResult<UnreadCounters> {
        let notifications = self.notification_counts(user_id).await?.total;
        let per_conversation = self.unread_by_conversation(user_id).await?;

        Ok(UnreadCounters {
            notifications,
            unread_messages: per_conversation.values().sum(),
            unread_conversations: per_conversation.values().filter(|n| **n > 0).count() as u64,
        })
    }
}

/// Ids of the conversations `user_id` participates in
fn conversations_of(user_id: &str) -> sea_orm::sea_query::SelectStatement {
    Query::select()
        .column(participants::Column::ConversationId)
        .from(participants::Entity)
        .and_where(participants::Column::UserId.eq(user_id))
        .to_owned()
}

fn unread_messages(user_id: &str) -> Select<messages::Entity> {
    let marked = Query::select()
        .column(read_marks::Column::MessageId)
        .from(read_marks::Entity)
        .and_where(read_marks::Column::UserId.eq(user_id))
        .to_owned();

    messages::Entity::find()
        .filter(messages::Column::ConversationId.in_subquery(conversations_of(user_id)))
        .filter(messages::Column::SenderId.ne(user_id))
        .filter(messages::Column::Id.not_in_subquery(marked))
}

pub(crate) async fn unread_by_conversation<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> StoreResult<HashMap<String, u64>> {
    let rows: Vec<(String, i64)> = unread_messages(user_id)
        .select_only()
        .column(messages::Column::ConversationId)
        .column_as(messages::Column::Id.count(), "unread")
        .group_by(messages::Column::ConversationId)
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(conversation_id, unread)| (conversation_id, unread.max(0) as u64))
        .collect())
}
