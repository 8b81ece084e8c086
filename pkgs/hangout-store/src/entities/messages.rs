//! Message entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub kind: String, // "text", "image" or "file"
    pub content: String,
    pub attachment_ref: Option<String>,
    pub reply_to: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub edited: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversations::Entity",
        from = "Column::ConversationId",
        to = "super::conversations::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Conversation,
    #[sea_orm(has_many = "super::read_marks::Entity")]
    ReadMarks,
}

impl Related<super::conversations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::read_marks::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReadMarks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
