//! Conversation manager - direct and group conversations and their rosters

use std::collections::{HashMap, HashSet};

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::change_feed::{ChangeEvent, ChangeOp, ChangeRow};
use crate::entities::{conversations, participants};
use crate::error::{StoreError, StoreResult};
use crate::events::{
    Conversation, ConversationKind, ConversationSummary, MessageKind, MessagePreview, Participant,
    ParticipantRole,
};
use crate::profile_directory::ProfileDirectory;
use crate::{message_store, now_millis, read_ledger, truncate_chars, Store};

/// A validated conversation about to be created.
///
/// Construction enforces the per-kind invariants: a direct conversation joins two
/// distinct users, a group has a non-empty name and at least one member besides
/// its creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    kind: ConversationKind,
    creator: String,
    members: Vec<String>,
}

impl NewConversation {
    pub fn direct(user_a: &str, user_b: &str) -> StoreResult<Self> {
        if user_a.is_empty() || user_b.is_empty() {
            return Err(StoreError::Validation("user id must not be empty".into()));
        }
        if user_a == user_b {
            return Err(StoreError::InvalidParticipant(format!(
                "cannot start a direct conversation of {} with themself",
                user_a
            )));
        }

        Ok(Self {
            kind: ConversationKind::Direct,
            creator: user_a.to_string(),
            members: vec![user_b.to_string()],
        })
    }

    pub fn group(creator: &str, name: &str, member_ids: &[String]) -> StoreResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("group name must not be empty".into()));
        }
        if creator.is_empty() {
            return Err(StoreError::Validation("creator id must not be empty".into()));
        }

        let mut seen = HashSet::new();
        let members: Vec<String> = member_ids
            .iter()
            .filter(|id| !id.is_empty() && id.as_str() != creator)
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        if members.is_empty() {
            return Err(StoreError::Validation(
                "a group needs at least one member besides its creator".into(),
            ));
        }

        Ok(Self {
            kind: ConversationKind::Group {
                name: name.to_string(),
            },
            creator: creator.to_string(),
            members,
        })
    }

    pub fn kind(&self) -> &ConversationKind {
        &self.kind
    }

    /// Every participant, creator first
    pub fn participant_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.creator.as_str()).chain(self.members.iter().map(String::as_str))
    }

    fn direct_key(&self) -> Option<String> {
        match self.kind {
            ConversationKind::Direct => Some(direct_key(&self.creator, &self.members[0])),
            ConversationKind::Group { .. } => None,
        }
    }

    fn creator_role(&self) -> ParticipantRole {
        match self.kind {
            ConversationKind::Direct => ParticipantRole::Member,
            ConversationKind::Group { .. } => ParticipantRole::Admin,
        }
    }
}

/// Order-independent key of a user pair. Ids are length-prefixed so no two pairs collide.
pub(crate) fn direct_key(user_a: &str, user_b: &str) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}:{}:{}", low.len(), low, high)
}

/// Conversation manager
#[derive(Clone)]
pub struct ConversationManager {
    store: Store,
    profiles: ProfileDirectory,
}

impl ConversationManager {
    pub fn new(store: Store) -> Self {
        Self {
            profiles: ProfileDirectory::new(store.clone()),
            store,
        }
    }

    /// Return the direct conversation of the unordered pair, creating it on first use.
    ///
    /// The conversation row is inserted with `ON CONFLICT(direct_key) DO NOTHING`, so of
    /// two concurrent callers exactly one creates it and the other gets the same id back.
    pub async fn get_or_create_direct(&self, user_a: &str, user_b: &str) -> StoreResult<String> {
        let plan = NewConversation::direct(user_a, user_b)?;
        let key = direct_key(user_a, user_b);

        if let Some(id) = self.insert_conversation(&plan).await? {
            return Ok(id);
        }

        let existing = conversations::Entity::find()
            .filter(conversations::Column::DirectKey.eq(key))
            .one(&self.store.db)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "direct conversation of {} and {} vanished after conflict",
                    user_a, user_b
                ))
            })?;

        debug!(
            "Direct conversation of {} and {} already exists: {}",
            user_a, user_b, existing.id
        );
        Ok(existing.id)
    }

    /// Create a named group; the creator becomes its admin
    pub async fn create_group(
        &self,
        creator: &str,
        name: &str,
        member_ids: &[String],
    ) -> StoreResult<String> {
        let plan = NewConversation::group(creator, name, member_ids)?;
        self.insert_conversation(&plan).await?.ok_or_else(|| {
            StoreError::InvalidOperation("group conversation was not inserted".into())
        })
    }

    /// Insert conversation and roster in one transaction.
    ///
    /// Returns `None` when a direct conversation for the pair already exists.
    async fn insert_conversation(&self, plan: &NewConversation) -> StoreResult<Option<String>> {
        let now = now_millis();
        let id = Uuid::new_v4().to_string();
        let name = match plan.kind() {
            ConversationKind::Group { name } => Some(name.clone()),
            ConversationKind::Direct => None,
        };

        let row = conversations::ActiveModel {
            id: Set(id.clone()),
            kind: Set(plan.kind().as_str().to_string()),
            name: Set(name),
            direct_key: Set(plan.direct_key()),
            created_by: Set(plan.creator.clone()),
            created_at: Set(now),
            updated_at: Set(now),
            last_activity_at: Set(now),
        };

        let roster: Vec<Participant> = plan
            .participant_ids()
            .enumerate()
            .map(|(i, user_id)| Participant {
                conversation_id: id.clone(),
                user_id: user_id.to_string(),
                role: if i == 0 {
                    plan.creator_role()
                } else {
                    ParticipantRole::Member
                },
                joined_at: now,
            })
            .collect();

        // The insert is the first statement so the write lock is taken up front
        let txn = self.store.db.begin().await?;

        let inserted = conversations::Entity::insert(row)
            .on_conflict(
                OnConflict::column(conversations::Column::DirectKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if inserted == 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        participants::Entity::insert_many(roster.iter().map(|p| participants::ActiveModel {
            conversation_id: Set(p.conversation_id.clone()),
            user_id: Set(p.user_id.clone()),
            role: Set(p.role.as_str().to_string()),
            joined_at: Set(p.joined_at),
        }))
        .exec_without_returning(&txn)
        .await?;

        txn.commit().await?;

        info!(
            "Created {} conversation {} with {} participants",
            plan.kind().as_str(),
            id,
            roster.len()
        );

        // Roster first: listeners widen their scope on their own participant row
        for participant in roster {
            self.store.feed.publish(ChangeEvent::new(
                ChangeOp::Insert,
                ChangeRow::Participant(participant),
                now,
            ));
        }
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            ChangeRow::Conversation(Conversation {
                id: id.clone(),
                kind: plan.kind().clone(),
                created_by: plan.creator.clone(),
                created_at: now,
                updated_at: now,
                last_activity_at: now,
            }),
            now,
        ));

        Ok(Some(id))
    }

    /// Get a conversation by id
    pub async fn get(&self, conversation_id: &str) -> StoreResult<Conversation> {
        let model = conversations::Entity::find_by_id(conversation_id.to_string())
            .one(&self.store.db)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("conversation {}", conversation_id))
            })?;

        Conversation::try_from(model)
    }

    pub async fn participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> StoreResult<Option<Participant>> {
        find_participant(&self.store.db, conversation_id, user_id).await
    }

    pub async fn is_participant(&self, conversation_id: &str, user_id: &str) -> StoreResult<bool> {
        Ok(self.participant(conversation_id, user_id).await?.is_some())
    }

    /// Current roster, earliest joiner first
    pub async fn participants(&self, conversation_id: &str) -> StoreResult<Vec<Participant>> {
        participants::Entity::find()
            .filter(participants::Column::ConversationId.eq(conversation_id))
            .order_by_asc(participants::Column::JoinedAt)
            .order_by_asc(participants::Column::UserId)
            .all(&self.store.db)
            .await?
            .into_iter()
            .map(Participant::try_from)
            .collect()
    }

    /// Ids of every conversation the user currently participates in
    pub async fn conversation_ids_for(&self, user_id: &str) -> StoreResult<Vec<String>> {
        Ok(participants::Entity::find()
            .select_only()
            .column(participants::Column::ConversationId)
            .filter(participants::Column::UserId.eq(user_id))
            .into_tuple::<String>()
            .all(&self.store.db)
            .await?)
    }

    /// Conversations of a user, most recently active first, as seen by that user
    pub async fn list_for_user(&self, user_id: &str) -> StoreResult<Vec<ConversationSummary>> {
        let ids = self.conversation_ids_for(user_id).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conversations = conversations::Entity::find()
            .filter(conversations::Column::Id.is_in(ids.iter().cloned()))
            .order_by_desc(conversations::Column::LastActivityAt)
            .order_by_desc(conversations::Column::Id)
            .all(&self.store.db)
            .await?;

        let counts: HashMap<String, i64> = participants::Entity::find()
            .select_only()
            .column(participants::Column::ConversationId)
            .column_as(participants::Column::UserId.count(), "participant_count")
            .filter(participants::Column::ConversationId.is_in(ids.iter().cloned()))
            .group_by(participants::Column::ConversationId)
            .into_tuple::<(String, i64)>()
            .all(&self.store.db)
            .await?
            .into_iter()
            .collect();

        let direct_ids: Vec<String> = conversations
            .iter()
            .filter(|c| c.kind == ConversationKind::Direct.as_str())
            .map(|c| c.id.clone())
            .collect();

        let peers: HashMap<String, String> = if direct_ids.is_empty() {
            HashMap::new()
        } else {
            participants::Entity::find()
                .filter(participants::Column::ConversationId.is_in(direct_ids))
                .filter(participants::Column::UserId.ne(user_id))
                .all(&self.store.db)
                .await?
                .into_iter()
                .map(|p| (p.conversation_id, p.user_id))
                .collect()
        };

        let peer_ids: Vec<String> = peers.values().cloned().collect();
        let names = self.profiles.display_names(&peer_ids).await?;
        let unread = read_ledger::unread_by_conversation(&self.store.db, user_id).await?;
        let mut latest = message_store::latest_messages_for(&self.store.db, user_id).await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for model in conversations {
            let participant_count = counts.get(&model.id).copied().unwrap_or(0) as u64;
            let unread_count = unread.get(&model.id).copied().unwrap_or(0);
            let conversation = Conversation::try_from(model)?;

            let display_name = match &conversation.kind {
                ConversationKind::Group { name } => name.clone(),
                ConversationKind::Direct => peers
                    .get(&conversation.id)
                    .and_then(|peer| names.get(peer))
                    .cloned()
                    .unwrap_or_default(),
            };

            let last_message = latest.remove(&conversation.id).map(|m| MessagePreview {
                text: preview_text(m.kind, &m.content, self.store.config.preview_chars),
                message_id: m.id,
                sender_id: m.sender_id,
                kind: m.kind,
                created_at: m.created_at,
            });

            summaries.push(ConversationSummary {
                id: conversation.id,
                kind: conversation.kind,
                display_name,
                participant_count,
                last_message,
                last_activity_at: conversation.last_activity_at,
                unread_count,
            });
        }

        debug!("Listed {} conversations for {}", summaries.len(), user_id);
        Ok(summaries)
    }

    /// Add a member to a group. Only admins may add; adding a current member is a no-op.
    ///
    /// Returns whether the user was newly added.
    pub async fn add_participant(
        &self,
        actor_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> StoreResult<bool> {
        if user_id.is_empty() {
            return Err(StoreError::Validation("user id must not be empty".into()));
        }

        let participant = Participant {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            role: ParticipantRole::Member,
            joined_at: now_millis(),
        };

        let txn = self.store.db.begin().await?;
        let result = add_member(&txn, actor_id, &participant).await;
        let inserted = finish(txn, result).await?;

        if !inserted {
            debug!("{} is already in {}", user_id, conversation_id);
            return Ok(false);
        }

        info!("{} added {} to {}", actor_id, user_id, conversation_id);
        let joined_at = participant.joined_at;
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Insert,
            ChangeRow::Participant(participant),
            joined_at,
        ));
        Ok(true)
    }

    /// Remove a member from a group.
    ///
    /// Admins may remove anyone; every member may remove themself. A group never drops
    /// below two participants, and when its last admin leaves the longest-standing
    /// remaining member becomes admin in the same transaction.
    pub async fn remove_participant(
        &self,
        actor_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> StoreResult<()> {
        let txn = self.store.db.begin().await?;
        let result = remove_member(&txn, actor_id, conversation_id, user_id).await;
        let (removed, promoted) = finish(txn, result).await?;

        info!("{} removed {} from {}", actor_id, user_id, conversation_id);
        let now = now_millis();
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Delete,
            ChangeRow::Participant(removed),
            now,
        ));
        if let Some(heir) = promoted {
            info!("Promoted {} to admin of {}", heir.user_id, conversation_id);
            self.store.feed.publish(ChangeEvent::new(
                ChangeOp::Update,
                ChangeRow::Participant(heir),
                now,
            ));
        }

        Ok(())
    }

    /// Change the role of a group member. A group always keeps at least one admin.
    pub async fn set_role(
        &self,
        actor_id: &str,
        conversation_id: &str,
        user_id: &str,
        role: ParticipantRole,
    ) -> StoreResult<()> {
        let txn = self.store.db.begin().await?;
        let result = change_role(&txn, actor_id, conversation_id, user_id, role).await;
        let Some(target) = finish(txn, result).await? else {
            return Ok(());
        };

        info!(
            "{} set role of {} in {} to {}",
            actor_id,
            user_id,
            conversation_id,
            role.as_str()
        );
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Update,
            ChangeRow::Participant(target),
            now_millis(),
        ));
        Ok(())
    }

    /// Rename a group (admins only)
    pub async fn rename_group(
        &self,
        actor_id: &str,
        conversation_id: &str,
        name: &str,
    ) -> StoreResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("group name must not be empty".into()));
        }

        let txn = self.store.db.begin().await?;
        let result = rename(&txn, actor_id, conversation_id, name).await;
        let conversation = finish(txn, result).await?;

        info!("{} renamed {} to '{}'", actor_id, conversation_id, name);
        let updated_at = conversation.updated_at;
        self.store.feed.publish(ChangeEvent::new(
            ChangeOp::Update,
            ChangeRow::Conversation(conversation),
            updated_at,
        ));
        Ok(())
    }
}

/// Commit on success, roll back otherwise
async fn finish<T>(txn: DatabaseTransaction, result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            txn.rollback().await?;
            Err(e)
        }
    }
}

/// Take the write lock on a group before its roster is read.
///
/// Every roster change starts here, so permission checks and the writes that
/// follow see the same roster.
async fn lock_group(txn: &DatabaseTransaction, conversation_id: &str) -> StoreResult<Conversation> {
    let touched = conversations::Entity::update_many()
        .col_expr(
            conversations::Column::UpdatedAt,
            Expr::col(conversations::Column::UpdatedAt).into(),
        )
        .filter(conversations::Column::Id.eq(conversation_id))
        .exec(txn)
        .await?;

    if touched.rows_affected == 0 {
        return Err(StoreError::NotFound(format!("conversation {}", conversation_id)));
    }

    let model = conversations::Entity::find_by_id(conversation_id.to_string())
        .one(txn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))?;
    let conversation = Conversation::try_from(model)?;

    if !conversation.kind.is_group() {
        return Err(StoreError::InvalidOperation(format!(
            "{} is a direct conversation",
            conversation_id
        )));
    }
    Ok(conversation)
}

async fn find_participant<C: ConnectionTrait>(
    db: &C,
    conversation_id: &str,
    user_id: &str,
) -> StoreResult<Option<Participant>> {
    participants::Entity::find_by_id((conversation_id.to_string(), user_id.to_string()))
        .one(db)
        .await?
        .map(Participant::try_from)
        .transpose()
}

async fn require_member(
    txn: &DatabaseTransaction,
    conversation_id: &str,
    user_id: &str,
) -> StoreResult<Participant> {
    find_participant(txn, conversation_id, user_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("{} is not in {}", user_id, conversation_id)))
}

async fn require_admin(
    txn: &DatabaseTransaction,
    conversation_id: &str,
    actor_id: &str,
) -> StoreResult<()> {
    match find_participant(txn, conversation_id, actor_id).await? {
        Some(p) if p.role == ParticipantRole::Admin => Ok(()),
        Some(_) => Err(StoreError::PermissionDenied(format!(
            "{} is not an admin of {}",
            actor_id, conversation_id
        ))),
        None => Err(StoreError::PermissionDenied(format!(
            "{} is not a participant of {}",
            actor_id, conversation_id
        ))),
    }
}

/// Returns whether the participant was newly inserted
async fn add_member(
    txn: &DatabaseTransaction,
    actor_id: &str,
    participant: &Participant,
) -> StoreResult<bool> {
    let conversation_id = participant.conversation_id.as_str();
    lock_group(txn, conversation_id).await?;
    require_admin(txn, conversation_id, actor_id).await?;

    let inserted = participants::Entity::insert(participants::ActiveModel {
        conversation_id: Set(participant.conversation_id.clone()),
        user_id: Set(participant.user_id.clone()),
        role: Set(participant.role.as_str().to_string()),
        joined_at: Set(participant.joined_at),
    })
    .on_conflict(
        OnConflict::columns([
            participants::Column::ConversationId,
            participants::Column::UserId,
        ])
        .do_nothing()
        .to_owned(),
    )
    .exec_without_returning(txn)
    .await?;

    Ok(inserted > 0)
}

/// Returns the removed participant and the member promoted in its place, if any
async fn remove_member(
    txn: &DatabaseTransaction,
    actor_id: &str,
    conversation_id: &str,
    user_id: &str,
) -> StoreResult<(Participant, Option<Participant>)> {
    lock_group(txn, conversation_id).await?;
    if actor_id != user_id {
        require_admin(txn, conversation_id, actor_id).await?;
    }
    let removed = require_member(txn, conversation_id, user_id).await?;

    participants::Entity::delete_many()
        .filter(participants::Column::ConversationId.eq(conversation_id))
        .filter(participants::Column::UserId.eq(user_id))
        .exec(txn)
        .await?;

    let remaining = participants::Entity::find()
        .filter(participants::Column::ConversationId.eq(conversation_id))
        .order_by_asc(participants::Column::JoinedAt)
        .order_by_asc(participants::Column::UserId)
        .all(txn)
        .await?;

    if remaining.len() < 2 {
        return Err(StoreError::InvalidOperation(format!(
            "a group needs at least two participants, {} would be left with {}",
            conversation_id,
            remaining.len()
        )));
    }

    let admin = ParticipantRole::Admin.as_str();
    if remaining.iter().any(|p| p.role == admin) {
        return Ok((removed, None));
    }

    let heir = &remaining[0];
    participants::Entity::update_many()
        .col_expr(participants::Column::Role, Expr::value(admin))
        .filter(participants::Column::ConversationId.eq(conversation_id))
        .filter(participants::Column::UserId.eq(heir.user_id.as_str()))
        .exec(txn)
        .await?;

    let mut heir = Participant::try_from(heir.clone())?;
    heir.role = ParticipantRole::Admin;
    Ok((removed, Some(heir)))
}

/// Returns the participant with its new role, or None when the role was already set
async fn change_role(
    txn: &DatabaseTransaction,
    actor_id: &str,
    conversation_id: &str,
    user_id: &str,
    role: ParticipantRole,
) -> StoreResult<Option<Participant>> {
    lock_group(txn, conversation_id).await?;
    require_admin(txn, conversation_id, actor_id).await?;

    let mut target = require_member(txn, conversation_id, user_id).await?;
    if target.role == role {
        return Ok(None);
    }

    participants::Entity::update_many()
        .col_expr(participants::Column::Role, Expr::value(role.as_str()))
        .filter(participants::Column::ConversationId.eq(conversation_id))
        .filter(participants::Column::UserId.eq(user_id))
        .exec(txn)
        .await?;

    let admins = participants::Entity::find()
        .filter(participants::Column::ConversationId.eq(conversation_id))
        .filter(participants::Column::Role.eq(ParticipantRole::Admin.as_str()))
        .count(txn)
        .await?;

    if admins == 0 {
        return Err(StoreError::InvalidOperation(format!(
            "{} would be left without an admin",
            conversation_id
        )));
    }

    target.role = role;
    Ok(Some(target))
}

async fn rename(
    txn: &DatabaseTransaction,
    actor_id: &str,
    conversation_id: &str,
    name: &str,
) -> StoreResult<Conversation> {
    let mut conversation = lock_group(txn, conversation_id).await?;
    require_admin(txn, conversation_id, actor_id).await?;

    let updated_at = now_millis().max(conversation.updated_at + 1);
    conversations::Entity::update_many()
        .col_expr(conversations::Column::Name, Expr::value(name))
        .col_expr(conversations::Column::UpdatedAt, Expr::value(updated_at))
        .filter(conversations::Column::Id.eq(conversation_id))
        .exec(txn)
        .await?;

    conversation.kind = ConversationKind::Group {
        name: name.to_string(),
    };
    conversation.updated_at = updated_at;
    Ok(conversation)
}

/// Short text shown for a message in lists and notifications; attachments without a caption get a placeholder
pub fn preview_text(kind: MessageKind, content: &str, max_chars: usize) -> String {
    if !content.trim().is_empty() {
        return truncate_chars(content, max_chars);
    }
    match kind {
        MessageKind::Text => String::new(),
        MessageKind::Image => "Sent an image".to_string(),
        MessageKind::File => "Sent a file".to_string(),
    }
}
