//! Per-subscriber filtering: what a user may see, and whether a change is stale

use std::collections::{HashMap, HashSet, VecDeque};

use hangout_store::{ChangeEvent, ChangeOp, ChangeRow, Table};

/// Decides which changes reach one subscriber.
///
/// The conversation scope is loaded once at subscribe time and then follows the
/// subscriber's own participant changes, so joining a group widens it and leaving
/// narrows it without another store round trip.
pub(crate) struct SubscriberFilter {
    user_id: String,
    conversations: HashSet<String>,
    versions: VersionWindow,
}

impl SubscriberFilter {
    pub(crate) fn new(
        user_id: &str,
        conversation_ids: impl IntoIterator<Item = String>,
        version_window: usize,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            conversations: conversation_ids.into_iter().collect(),
            versions: VersionWindow::new(version_window),
        }
    }

    pub(crate) fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Replace the conversation scope after events may have been missed
    pub(crate) fn reset_scope(&mut self, conversation_ids: impl IntoIterator<Item = String>) {
        self.conversations = conversation_ids.into_iter().collect();
    }

    pub(crate) fn in_scope(&self, conversation_id: &str) -> bool {
        self.conversations.contains(conversation_id)
    }

    /// Whether `event` should be delivered. Updates the scope and version state.
    pub(crate) fn admit(&mut self, event: &ChangeEvent) -> bool {
        if let ChangeRow::Participant(p) = &event.row {
            if p.user_id == self.user_id {
                match event.op {
                    ChangeOp::Insert | ChangeOp::Update => {
                        self.conversations.insert(p.conversation_id.clone());
                    }
                    ChangeOp::Delete => {
                        self.conversations.remove(&p.conversation_id);
                    }
                }
            }
        }

        self.entitled(&event.row) && self.versions.admit(event)
    }

    fn entitled(&self, row: &ChangeRow) -> bool {
        match row {
            ChangeRow::Conversation(c) => self.in_scope(&c.id),
            // The subscriber's own removal is delivered after the scope shrinks
            ChangeRow::Participant(p) => {
                p.user_id == self.user_id || self.in_scope(&p.conversation_id)
            }
            ChangeRow::Message(m) => self.in_scope(&m.conversation_id),
            ChangeRow::Notification(n) => n.recipient_id == self.user_id,
            ChangeRow::ReadMarks { user_id, .. } => *user_id == self.user_id,
            ChangeRow::NotificationsRead { recipient_id, .. } => *recipient_id == self.user_id,
        }
    }
}

/// Newest `(version, op)` seen per entity, for the most recent `capacity` entities.
///
/// Entities evicted from the window are admitted again; only changes that arrive
/// out of order within the window are caught.
pub(crate) struct VersionWindow {
    capacity: usize,
    latest: HashMap<(Table, String), (i64, ChangeOp)>,
    order: VecDeque<(Table, String)>,
}

impl VersionWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            latest: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn admit(&mut self, event: &ChangeEvent) -> bool {
        let Some((table, id)) = event.entity_key() else {
            return true;
        };
        let incoming = (event.version, event.op);

        if let Some(seen) = self.latest.get_mut(&(table, id.to_string())) {
            if incoming <= *seen {
                return false;
            }
            *seen = incoming;
            return true;
        }

        if self.capacity == 0 {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.latest.remove(&oldest);
            }
        }
        let key = (table, id.to_string());
        self.order.push_back(key.clone());
        self.latest.insert(key, incoming);
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.latest.len()
    }
}
