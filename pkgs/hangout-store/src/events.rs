//! Domain types shared by the stores and the realtime layer

use serde::{Deserialize, Serialize};

use crate::entities::{conversations, messages, notifications, participants};
use crate::error::StoreError;

/// Conversation kind, carrying the group name for groups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group { name: String },
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Direct => "direct",
            ConversationKind::Group { .. } => "group",
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ConversationKind::Group { .. })
    }
}

/// Participant role within a conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Member,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Member => "member",
            ParticipantRole::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "member" => Ok(ParticipantRole::Member),
            "admin" => Ok(ParticipantRole::Admin),
            other => Err(StoreError::Validation(format!("unknown role '{}'", other))),
        }
    }
}

/// Message kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            other => Err(StoreError::Validation(format!(
                "unknown message kind '{}'",
                other
            ))),
        }
    }
}

/// Notification kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Follow,
    Message,
    Like,
    Comment,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        NotificationKind::Follow,
        NotificationKind::Message,
        NotificationKind::Like,
        NotificationKind::Comment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Follow => "follow",
            NotificationKind::Message => "message",
            NotificationKind::Like => "like",
            NotificationKind::Comment => "comment",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "follow" => Ok(NotificationKind::Follow),
            "message" => Ok(NotificationKind::Message),
            "like" => Ok(NotificationKind::Like),
            "comment" => Ok(NotificationKind::Comment),
            other => Err(StoreError::Validation(format!(
                "unknown notification kind '{}'",
                other
            ))),
        }
    }
}

/// Kind-specific notification payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationPayload {
    Follow {
        follower_id: String,
    },
    Message {
        conversation_id: String,
        sender_id: String,
        preview: String,
    },
    Like {
        post_id: String,
        actor_id: String,
    },
    Comment {
        post_id: String,
        actor_id: String,
        excerpt: String,
    },
}

impl NotificationPayload {
    pub fn kind(&self) -> NotificationKind {
        match self {
            NotificationPayload::Follow { .. } => NotificationKind::Follow,
            NotificationPayload::Message { .. } => NotificationKind::Message,
            NotificationPayload::Like { .. } => NotificationKind::Like,
            NotificationPayload::Comment { .. } => NotificationKind::Comment,
        }
    }

    /// The user whose action produced the notification
    pub fn actor_id(&self) -> &str {
        match self {
            NotificationPayload::Follow { follower_id } => follower_id,
            NotificationPayload::Message { sender_id, .. } => sender_id,
            NotificationPayload::Like { actor_id, .. } => actor_id,
            NotificationPayload::Comment { actor_id, .. } => actor_id,
        }
    }
}

/// Conversation record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_activity_at: i64,
}

impl TryFrom<conversations::Model> for Conversation {
    type Error = StoreError;

    fn try_from(model: conversations::Model) -> Result<Self, Self::Error> {
        let kind = match model.kind.as_str() {
            "direct" => ConversationKind::Direct,
            "group" => ConversationKind::Group {
                name: model.name.unwrap_or_default(),
            },
            other => {
                return Err(StoreError::Validation(format!(
                    "unknown conversation kind '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            id: model.id,
            kind,
            created_by: model.created_by,
            created_at: model.created_at,
            updated_at: model.updated_at,
            last_activity_at: model.last_activity_at,
        })
    }
}

/// Participant record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: String,
    pub user_id: String,
    pub role: ParticipantRole,
    pub joined_at: i64,
}

impl TryFrom<participants::Model> for Participant {
    type Error = StoreError;

    fn try_from(model: participants::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            role: ParticipantRole::parse(&model.role)?,
            conversation_id: model.conversation_id,
            user_id: model.user_id,
            joined_at: model.joined_at,
        })
    }
}

/// Stored message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub edited: bool,
}

impl TryFrom<messages::Model> for Message {
    type Error = StoreError;

    fn try_from(model: messages::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: MessageKind::parse(&model.kind)?,
            id: model.id,
            conversation_id: model.conversation_id,
            sender_id: model.sender_id,
            content: model.content,
            attachment_ref: model.attachment_ref,
            reply_to: model.reply_to,
            created_at: model.created_at,
            updated_at: model.updated_at,
            edited: model.edited,
        })
    }
}

/// Stored notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub payload: NotificationPayload,
    pub created_at: i64,
    pub is_read: bool,
    pub read_at: Option<i64>,
}

impl TryFrom<notifications::Model> for Notification {
    type Error = StoreError;

    fn try_from(model: notifications::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: NotificationKind::parse(&model.kind)?,
            payload: serde_json::from_str(&model.payload_json)?,
            id: model.id,
            recipient_id: model.recipient_id,
            title: model.title,
            body: model.body,
            created_at: model.created_at,
            is_read: model.is_read,
            read_at: model.read_at,
        })
    }
}

/// Latest message shown in a conversation list row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePreview {
    pub message_id: String,
    pub sender_id: String,
    pub kind: MessageKind,
    pub text: String,
    pub created_at: i64,
}

/// Read-side projection of a conversation for one viewer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub kind: ConversationKind,
    pub display_name: String,
    pub participant_count: u64,
    pub last_message: Option<MessagePreview>,
    pub last_activity_at: i64,
    pub unread_count: u64,
}

/// One page of history, oldest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// True when older messages exist before the first one in this page
    pub has_more: bool,
}

impl MessagePage {
    /// Cursor for fetching the next older page
    pub fn next_cursor(&self) -> Option<&str> {
        if self.has_more {
            self.messages.first().map(|m| m.id.as_str())
        } else {
            None
        }
    }
}
