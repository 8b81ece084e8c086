//! Message store - append, paginate, edit and delete conversation messages

use std::collections::HashMap;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set, Statement, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::change_feed::{ChangeEvent, ChangeOp, ChangeRow};
use crate::entities::{conversations, messages, participants};
use crate::error::{StoreError, StoreResult};
use crate::events::{Message, MessageKind, MessagePage};
use crate::{now_millis, Store};

/// Optimistic edit attempts before giving up on a contended message
const EDIT_ATTEMPTS: usize = 3;

/// A message as submitted by its sender. Ids and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub reply_to: Option<String>,
}

impl NewMessage {
    pub fn text(conversation_id: &str, sender_id: &str, content: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            kind: MessageKind::Text,
            content: content.to_string(),
            attachment_ref: None,
            reply_to: None,
        }
    }

    /// Image or file message; `caption` may be empty
    pub fn attachment(
        conversation_id: &str,
        sender_id: &str,
        kind: MessageKind,
        attachment_ref: &str,
        caption: &str,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
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

    fn validate(&self) -> StoreResult<()> {
        match self.kind {
            MessageKind::Text if self.content.trim().is_empty() => Err(StoreError::Validation(
                "text message must not be empty".into(),
            )),
            MessageKind::Image | MessageKind::File
                if self
                    .attachment_ref
                    .as_deref()
                    .map_or(true, |r| r.trim().is_empty()) =>
            {
                Err(StoreError::Validation(format!(
                    "{} message needs an attachment reference",
                    self.kind.as_str()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Message store
#[derive(Clone)]
pub struct MessageStore {
    store: Store,
}

impl MessageStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a message to a conversation the sender participates in.
    ///
    /// The stored record carries a server-assigned id and timestamp, and the
    /// conversation's last activity moves forward to it.
    pub async fn append(&self, new: NewMessage) -> StoreResult<Message> {
        new.validate()?;
        self.require_conversation(&new.conversation_id).await?;

        if let Some(reply_to) = &new.reply_to {
            let target = self.get(reply_to).await?;
            if target.conversation_id != new.conversation_id {
                return Err(StoreError::Validation(format!(
                    "reply target {} belongs to another conversation",
                    reply_to
                )));
            }
        }

        let now = now_millis();
        let message = Message {
            id: Uuid::now_v7().to_string(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            kind: new.kind,
            content: new.content,
            attachment_ref: new.attachment_ref,
            reply_to: new.reply_to,
            created_at: now,
            updated_at: now,
            edited: false,
        };

        // Insert first so the write lock is taken before the roster is read
        let txn = self.store.db.begin().await?;

        messages::Entity::insert(messages::ActiveModel {
            id: Set(message.id.clone()),
            conversation_id: Set(message.conversation_id.clone()),
            sender_id: Set(message.sender_id.clone()),
            kind: Set(message.kind.as_str().to_string()),
            content: Set(message.content.clone()),
            attachment_ref: Set(message.attachment_ref.clone()),
            reply_to: Set(message.reply_to.clone()),
            created_at: Set(message.created_at),
            updated_at: Set(message.updated_at),
            edited: Set(false),
        })
        .exec_without_returning(&txn)
        .await?;

        let membership = participants::Entity::find_by_id((
            message.conversation_id.clone(),
            message.sender_id.clone(),
        ))
        .one(&txn)
        .await?;

        if membership.is_none() {
            txn.rollback().await?;
            warn!(
                "Rejected message from {} to {}: not a participant",
                message.sender_id, message.conversation_id
            );
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a participant of {}",
                message.sender_id, message.conversation_id
            )));
        }

        conversations::Entity::update_many()
            .col_expr(
                conversations::Column::LastActivityAt,
                Expr::value(message.created_at),
            )
            .filter(conversations::Column::Id.eq(message.conversation_id.as_str()))
            .filter(conversations::Column::LastActivityAt.lt(message.created_at))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        debug!(
            "Appended message {} to {}",
            message.id, message.conversation_id
        );
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            ChangeRow::Message(message.clone()),
            message.updated_at,
        ));

        Ok(message)
    }

    /// One page of history ending just before `before` (or at the newest message).
    ///
    /// Pages are cut on the `(created_at, id)` key rather than an offset, so repeating a
    /// cursor yields the same page and messages appended meanwhile never shift older pages.
    pub async fn page(
        &self,
        conversation_id: &str,
        viewer_id: &str,
        limit: u64,
        before: Option<&str>,
    ) -> StoreResult<MessagePage> {
        if limit == 0 {
            return Err(StoreError::Validation("page limit must be positive".into()));
        }
        let limit = limit.min(self.store.config.max_page_size);

        self.require_conversation(conversation_id).await?;
        let membership = participants::Entity::find_by_id((
            conversation_id.to_string(),
            viewer_id.to_string(),
        ))
        .one(&self.store.db)
        .await?;
        if membership.is_none() {
            return Err(StoreError::PermissionDenied(format!(
                "{} is not a participant of {}",
                viewer_id, conversation_id
            )));
        }

        let mut query = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id));

        if let Some(cursor_id) = before {
            let cursor = messages::Entity::find_by_id(cursor_id.to_string())
                .one(&self.store.db)
                .await?
                .filter(|m| m.conversation_id == conversation_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!(
                        "message {} in {}",
                        cursor_id, conversation_id
                    ))
                })?;

            query = query.filter(
                Condition::any()
                    .add(messages::Column::CreatedAt.lt(cursor.created_at))
                    .add(
                        Condition::all()
                            .add(messages::Column::CreatedAt.eq(cursor.created_at))
                            .add(messages::Column::Id.lt(cursor.id)),
                    ),
            );
        }

        let mut rows = query
            .order_by_desc(messages::Column::CreatedAt)
            .order_by_desc(messages::Column::Id)
            .limit(limit + 1)
            .all(&self.store.db)
            .await?;

        let has_more = rows.len() as u64 > limit;
        rows.truncate(limit as usize);
        rows.reverse();

        let messages = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        debug!(
            "Fetched {} messages from {} (has_more: {})",
            messages.len(),
            conversation_id,
            has_more
        );
        Ok(MessagePage { messages, has_more })
    }

    /// Replace the content of a message. Only its sender may edit it.
    pub async fn edit(
        &self,
        message_id: &str,
        editor_id: &str,
        new_content: &str,
    ) -> StoreResult<Message> {
        for _ in 0..EDIT_ATTEMPTS {
            let mut current = self.get(message_id).await?;
            if current.sender_id != editor_id {
                return Err(StoreError::PermissionDenied(format!(
                    "{} did not send message {}",
                    editor_id, message_id
                )));
            }
            if current.kind == MessageKind::Text && new_content.trim().is_empty() {
                return Err(StoreError::Validation(
                    "text message must not be empty".into(),
                ));
            }

            let updated_at = now_millis().max(current.updated_at + 1);

            // Ownership and the version read above are both part of the update predicate
            let result = messages::Entity::update_many()
                .col_expr(messages::Column::Content, Expr::value(new_content))
                .col_expr(messages::Column::Edited, Expr::value(true))
                .col_expr(messages::Column::UpdatedAt, Expr::value(updated_at))
                .filter(messages::Column::Id.eq(message_id))
                .filter(messages::Column::SenderId.eq(editor_id))
                .filter(messages::Column::UpdatedAt.eq(current.updated_at))
                .exec(&self.store.db)
                .await?;

            if result.rows_affected == 1 {
                current.content = new_content.to_string();
                current.edited = true;
                current.updated_at = updated_at;

                info!("Message {} edited by {}", message_id, editor_id);
                self.store.feed.publish(ChangeEvent::new(
                    ChangeOp::Update,
                    ChangeRow::Message(current.clone()),
                    updated_at,
                ));
                return Ok(current);
            }

            debug!("Message {} changed during edit, retrying", message_id);
        }

        Err(StoreError::InvalidOperation(format!(
            "message {} is being modified concurrently",
            message_id
        )))
    }

    /// Hard-delete a message. Only its sender may delete it; its read marks go with it.
    pub async fn delete(&self, message_id: &str, requester_id: &str) -> StoreResult<()> {
        let current = self.get(message_id).await?;
        if current.sender_id != requester_id {
            return Err(StoreError::PermissionDenied(format!(
                "{} did not send message {}",
                requester_id, message_id
            )));
        }

        let result = messages::Entity::delete_many()
            .filter(messages::Column::Id.eq(message_id))
            .filter(messages::Column::SenderId.eq(requester_id))
            .exec(&self.store.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(format!("message {}", message_id)));
        }

        info!("Message {} deleted by {}", message_id, requester_id);
        // Nothing may follow a delete for the same message
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Delete,
            ChangeRow::Message(current),
            i64::MAX,
        ));
        Ok(())
    }

    /// Get a message by id
    pub async fn get(&self, message_id: &str) -> StoreResult<Message> {
        let model = messages::Entity::find_by_id(message_id.to_string())
            .one(&self.store.db)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("message {}", message_id)))?;

        Message::try_from(model)
    }

    /// Newest message of a conversation
    pub async fn latest(&self, conversation_id: &str) -> StoreResult<Option<Message>> {
        latest_message(&self.store.db, conversation_id).await
    }

    async fn require_conversation(&self, conversation_id: &str) -> StoreResult<()> {
        conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&self.store.db)
            .await?
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))
    }
}

pub(crate) async fn latest_message<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
) -> StoreResult<Option<Message>> {
    messages::Entity::find()
        .filter(messages::Column::ConversationId.eq(conversation_id))
        .order_by_desc(messages::Column::CreatedAt)
        .order_by_desc(messages::Column::Id)
        .one(db)
        .await?
        .map(Message::try_from)
        .transpose()
}

/// Newest message of every conversation `user_id` takes part in, keyed by conversation
pub(crate) async fn latest_messages_for<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> StoreResult<HashMap<String, Message>> {
    // Walks idx_messages_conversation_order once instead of once per conversation
    let statement = Statement::from_sql_and_values(
        db.get_database_backend(),
        r#"SELECT * FROM (
            SELECT m.*, ROW_NUMBER() OVER (
                PARTITION BY m.conversation_id
                ORDER BY m.created_at DESC, m.id DESC
            ) AS position
            FROM messages m
            WHERE m.conversation_id IN (
                SELECT conversation_id FROM participants WHERE user_id = ?
            )
        ) WHERE position = 1"#,
        [user_id.into()],
    );

    messages::Entity::find()
        .from_raw_sql(statement)
        .all(db)
        .await?
        .into_iter()
        .map(|model| {
            let message = Message::try_from(model)?;
            Ok((message.conversation_id.clone(), message))
        })
        .collect()
}
