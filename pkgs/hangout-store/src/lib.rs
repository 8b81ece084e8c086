//! Hangout Store - persistent state for the real-time interaction core
//!
//! This crate owns the durable side of messaging and notifications using Sea-ORM
//! over SQLite: conversations and their rosters, messages, per-reader read marks,
//! notifications, and a change feed that reports every committed write.
//!
//! # Architecture
//!
//! - **ConversationManager**: direct/group creation, rosters, roles, list projection
//! - **MessageStore**: append, keyset pagination, edit and delete with ownership checks
//! - **ReadLedger**: idempotent read marks and derived unread counters
//! - **NotificationCenter**: typed notifications, follow request decisions
//! - **FollowGraph**: follow edges behind the [`SocialGraph`] trait
//! - **ProfileDirectory**: display names used by list projections and notification text
//! - **ChangeFeed**: broadcast of committed row changes
//!
//! # Invariants kept by the schema
//!
//! - `conversations.direct_key` is unique, so a user pair has at most one direct conversation
//! - `read_marks(message_id, user_id)` is the primary key, so marking read is idempotent
//! - deleting a message cascades to its read marks
//!
//! Unread counts are never stored; they are derived from rows on every read.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use hangout_store::{ConversationManager, MessageKind, MessageStore, NewMessage, Store, StoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open(StoreConfig {
//!     db_path: "hangout.db".into(),
//!     ..Default::default()
//! })
//! .await?;
//!
//! let conversations = ConversationManager::new(store.clone());
//! let messages = MessageStore::new(store.clone());
//!
//! let conversation_id = conversations.get_or_create_direct("alice", "bob").await?;
//! messages
//!     .append(NewMessage::text(&conversation_id, "alice", "hello"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod change_feed;
pub mod conversation_manager;
pub mod entities;
pub mod error;
pub mod message_store;
pub mod migration;
pub mod notification_center;
pub mod profile_directory;
pub mod read_ledger;
pub mod social_graph;

mod events;

pub use change_feed::{ChangeEvent, ChangeFeed, ChangeOp, ChangeRow, Table};
pub use conversation_manager::{preview_text, ConversationManager, NewConversation};
pub use error::{StoreError, StoreResult};
pub use events::{
    Conversation, ConversationKind, ConversationSummary, Message, MessageKind, MessagePage,
    MessagePreview, Notification, NotificationKind, NotificationPayload, Participant,
    ParticipantRole,
};
pub use message_store::{MessageStore, NewMessage};
pub use notification_center::NotificationCenter;
pub use profile_directory::{Profile, ProfileDirectory};
pub use read_ledger::{NotificationCounts, ReadLedger, UnreadCounters};
pub use social_graph::{FollowGraph, SocialGraph};

use anyhow::{Context, Result};
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

/// Configuration for the persistence layer
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,

    /// Events buffered per change-feed listener before it starts lagging (default: 1024)
    pub change_feed_capacity: usize,

    /// Upper bound for a history page (default: 50)
    pub max_page_size: u64,

    /// Page size used when the caller does not ask for one (default: 30)
    pub default_page_size: u64,

    /// Characters kept from message previews and comment excerpts (default: 100)
    pub preview_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("hangout-store.db"),
            change_feed_capacity: 1024,
            max_page_size: 50,
            default_page_size: 30,
            preview_chars: 100,
        }
    }
}

/// Shared database handle plus the change feed every store publishes to
#[derive(Clone)]
pub struct Store {
    pub(crate) db: DatabaseConnection,
    pub(crate) feed: ChangeFeed,
    pub(crate) config: StoreConfig,
}

impl Store {
    /// Open (or create) the database at `config.db_path` and run migrations
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let db_path_str = config
            .db_path
            .to_str()
            .context("Invalid database path")?
            .replace("\\", "/");

        let db_url = format!("sqlite:{}?mode=rwc", db_path_str);

        let db: DatabaseConnection = Database::connect(db_url.as_str())
            .await
            .context("Failed to connect to database")?;

        let store = Self::with_connection(db, config).await?;
        info!("Store initialized at {}", store.config.db_path.display());
        Ok(store)
    }

    /// Build a store over an existing connection, running pending migrations
    pub async fn with_connection(db: DatabaseConnection, config: StoreConfig) -> Result<Self> {
        migration::Migrator::up(&db, None)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db,
            feed: ChangeFeed::new(config.change_feed_capacity),
            config,
        })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }
}

/// Current server time in Unix milliseconds
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Cut `text` to at most `max_chars` characters, appending an ellipsis when shortened
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}…", &trimmed[..byte_idx]),
        None => trimmed.to_string(),
    }
}
