//! Change feed - committed row changes fanned out to in-process listeners
//!
//! Every store publishes one [`ChangeEvent`] per committed write. The feed is a
//! bounded broadcast channel: a listener that falls behind loses the oldest
//! events (and learns how many through `RecvError::Lagged`), the publisher
//! never waits on it.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::events::{Conversation, Message, Notification, Participant};

/// Table a change belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    Participants,
    Messages,
    ReadMarks,
    Notifications,
}

/// Row-level operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Changed row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "row", rename_all = "snake_case")]
pub enum ChangeRow {
    Conversation(Conversation),
    Participant(Participant),
    Message(Message),
    Notification(Notification),
    /// Read marks recorded for one reader
    ReadMarks {
        user_id: String,
        message_ids: Vec<String>,
    },
    /// Every unread notification of the recipient was marked read in one update
    NotificationsRead { recipient_id: String, read_at: i64 },
}

/// A committed change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub row: ChangeRow,
    /// Strictly increases across the changes of one entity
    pub version: i64,
}

impl ChangeEvent {
    pub fn new(op: ChangeOp, row: ChangeRow, version: i64) -> Self {
        Self { op, row, version }
    }

    pub fn table(&self) -> Table {
        match &self.row {
            ChangeRow::Conversation(_) => Table::Conversations,
            ChangeRow::Participant(_) => Table::Participants,
            ChangeRow::Message(_) => Table::Messages,
            ChangeRow::Notification(_) => Table::Notifications,
            ChangeRow::ReadMarks { .. } => Table::ReadMarks,
            ChangeRow::NotificationsRead { .. } => Table::Notifications,
        }
    }

    /// Identity of the entity this change applies to, for rows whose changes are versioned
    pub fn entity_key(&self) -> Option<(Table, &str)> {
        match &self.row {
            ChangeRow::Conversation(c) => Some((Table::Conversations, c.id.as_str())),
            ChangeRow::Message(m) => Some((Table::Messages, m.id.as_str())),
            ChangeRow::Notification(n) => Some((Table::Notifications, n.id.as_str())),
            _ => None,
        }
    }
}

/// Broadcast handle shared by every store
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a committed change. No-op when nobody listens.
    pub fn publish(&self, event: ChangeEvent) {
        trace!(table = ?event.table(), op = ?event.op, "Publishing change");
        // Err only means there are no receivers right now
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
