//! Document store contract
//!
//! The store is the authoritative source for messages and rooms. The cache
//! layer only ever reads through it on a miss and writes to it before
//! touching the cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Message, MessageId, NewMessage, ReactionAction, Room, RoomId, UserId};
use crate::Result;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning id and timestamp
    async fn create_message(&self, new: NewMessage) -> Result<Message>;

    async fn find_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Messages of a room created strictly before `before`, newest first
    async fn list_messages(
        &self,
        room_id: &RoomId,
        before: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    async fn count_messages(&self, room_id: &RoomId) -> Result<u64>;

    /// Add a read receipt for `user_id` to every listed message that lacks
    /// one, in a single filtered update. Returns how many messages changed.
    async fn mark_read(
        &self,
        ids: &[MessageId],
        user_id: &UserId,
        read_at: DateTime<Utc>,
    ) -> Result<u64>;

    /// Apply a reaction toggle, returning the updated message
    async fn toggle_reaction(
        &self,
        id: &MessageId,
        reaction: &str,
        user_id: &UserId,
        action: ReactionAction,
    ) -> Result<Option<Message>>;

    /// Returns whether the message existed
    async fn delete_message(&self, id: &MessageId) -> Result<bool>;

    async fn find_room(&self, id: &RoomId) -> Result<Option<Room>>;

    async fn room_participants(&self, id: &RoomId) -> Result<Vec<UserId>>;

    async fn user_rooms(&self, user_id: &UserId) -> Result<Vec<RoomId>>;
}
