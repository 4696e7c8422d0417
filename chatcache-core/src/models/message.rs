use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MessageId, RoomId, UserId};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// A persisted chat message as materialized by the document store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    /// Reaction -> users who reacted with it
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

/// Add or remove a reaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionAction {
    Add,
    Remove,
}

impl Message {
    /// Materialize a new message with a fresh id
    #[must_use]
    pub fn from_new(new: NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id: MessageId::new(),
            room_id: new.room_id,
            sender_id: new.sender_id,
            kind: new.kind,
            content: new.content,
            created_at,
            edited_at: None,
            read_by: Vec::new(),
            reactions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_read_by(&self, user_id: &UserId) -> bool {
        self.read_by.iter().any(|r| &r.user_id == user_id)
    }

    /// Record a read receipt unless one already exists for this user.
    ///
    /// Returns whether the message changed.
    pub fn mark_read(&mut self, user_id: &UserId, read_at: DateTime<Utc>) -> bool {
        if self.is_read_by(user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user_id: user_id.clone(),
            read_at,
        });
        true
    }

    /// Reaction toggle rule: one entry per (user, reaction) pair.
    ///
    /// Adding an existing pair or removing a missing one is a no-op.
    /// Reactions left without users are dropped. Returns whether the
    /// message changed.
    pub fn apply_reaction(&mut self, reaction: &str, user_id: &UserId, action: ReactionAction) -> bool {
        match action {
            ReactionAction::Add => {
                let users = self.reactions.entry(reaction.to_string()).or_default();
                if users.contains(user_id) {
                    return false;
                }
                users.push(user_id.clone());
                true
            }
            ReactionAction::Remove => {
                let Some(users) = self.reactions.get_mut(reaction) else {
                    return false;
                };
                let before = users.len();
                users.retain(|u| u != user_id);
                let changed = users.len() != before;
                if users.is_empty() {
                    self.reactions.remove(reaction);
                }
                changed
            }
        }
    }
}

/// Input for creating a message; the store assigns id and timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: String,
}

impl NewMessage {
    #[must_use]
    pub fn user(room_id: RoomId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            room_id,
            sender_id,
            kind: MessageKind::User,
            content: content.into(),
        }
    }
}

/// One cached page of room history
///
/// `messages` is always ascending by `created_at`, whatever order the store
/// returned them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessageBatch {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub cached_at: DateTime<Utc>,
}

impl CachedMessageBatch {
    /// Build a batch from store rows fetched newest-first with `limit + 1`
    /// rows to detect whether older history exists.
    #[must_use]
    pub fn from_descending(mut rows: Vec<Message>, limit: usize) -> Self {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let oldest_timestamp = rows.first().map(|m| m.created_at);

        Self {
            messages: rows,
            has_more,
            oldest_timestamp,
            cached_at: Utc::now(),
        }
    }

    /// Whether this batch can answer a request for messages before `before`
    #[must_use]
    pub fn satisfies(&self, before: Option<DateTime<Utc>>) -> bool {
        match (before, self.oldest_timestamp) {
            (None, _) => true,
            (Some(cursor), Some(oldest)) => oldest <= cursor,
            (Some(_), None) => false,
        }
    }
}
