//! Room directory cache
//!
//! Cache-aside reads for room records, participant sets and user room
//! lists, plus per-user unread counters.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{keys, CacheValue, WriteThrough};
use crate::config::DataClass;
use crate::metrics::cache::{CACHE_HITS, CACHE_MISSES};
use crate::models::{Room, RoomId, UserId};
use crate::store::MessageStore;
use crate::Result;

#[derive(Clone)]
pub struct RoomDirectory {
    cache: WriteThrough,
    store: Arc<dyn MessageStore>,
}

impl std::fmt::Debug for RoomDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomDirectory").finish()
    }
}

impl RoomDirectory {
    #[must_use]
    pub fn new(cache: WriteThrough, store: Arc<dyn MessageStore>) -> Self {
        Self { cache, store }
    }

    pub async fn get_room(&self, room_id: &RoomId) -> Result<Option<Room>> {
        let key = keys::room(room_id);
        match self.cache.get(&key).await {
            Ok(Some(CacheValue::Room(room))) => {
                CACHE_HITS.with_label_values(&["room"]).inc();
                return Ok(Some(room));
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Room cache read failed"),
        }
        CACHE_MISSES.with_label_values(&["room"]).inc();

        let room = self.store.find_room(room_id).await?;
        if let Some(room) = &room {
            if let Err(e) = self
                .cache
                .write_class(&key, &CacheValue::Room(room.clone()), DataClass::RoomInfo)
                .await
            {
                warn!(key = %key, error = %e, "Failed to cache room");
            }
        }
        Ok(room)
    }

    pub async fn get_participants(&self, room_id: &RoomId) -> Result<Vec<UserId>> {
        let key = keys::participants(room_id);
        if let Some(members) = self.cached_members(&key, "participants").await {
            return Ok(members.into_iter().map(UserId::from).collect());
        }

        let participants = self.store.room_participants(room_id).await?;
        let members: Vec<&str> = participants.iter().map(UserId::as_str).collect();
        self.fill_set(&key, &members, DataClass::RoomInfo).await;
        Ok(participants)
    }

    pub async fn get_user_rooms(&self, user_id: &UserId) -> Result<Vec<RoomId>> {
        let key = keys::user_rooms(user_id);
        if let Some(members) = self.cached_members(&key, "user_rooms").await {
            return Ok(members.into_iter().map(RoomId::from).collect());
        }

        let rooms = self.store.user_rooms(user_id).await?;
        let members: Vec<&str> = rooms.iter().map(RoomId::as_str).collect();
        self.fill_set(&key, &members, DataClass::UserRooms).await;
        Ok(rooms)
    }

    pub async fn invalidate_room(&self, room_id: &RoomId) -> Result<()> {
        self.cache
            .invalidate(&[keys::room(room_id), keys::participants(room_id)], "room")
            .await?;
        Ok(())
    }

    pub async fn invalidate_user_rooms(&self, user_id: &UserId) -> Result<()> {
        self.cache
            .invalidate(&[keys::user_rooms(user_id)], "user_rooms")
            .await?;
        Ok(())
    }

    // ==================== Unread counters ====================

    pub async fn get_unread(&self, user_id: &UserId, room_id: &RoomId) -> Result<u64> {
        let key = keys::unread(user_id, room_id);
        let raw = self.cache.backend().hash_get(&key, keys::COUNTER_FIELD).await?;
        Ok(raw.and_then(|raw| raw.parse().ok()).unwrap_or(0))
    }

    /// Atomically bump the unread counter, returning the new value
    pub async fn increment_unread(&self, user_id: &UserId, room_id: &RoomId) -> Result<u64> {
        let key = keys::unread(user_id, room_id);
        let backend = self.cache.backend();
        let next = backend.hash_increment(&key, keys::COUNTER_FIELD, 1).await?;
        backend
            .expire(&key, self.cache.ttl().seconds(DataClass::MessageCount))
            .await?;
        Ok(u64::try_from(next).unwrap_or(0))
    }

    pub async fn reset_unread(&self, user_id: &UserId, room_id: &RoomId) -> Result<()> {
        self.cache
            .invalidate(&[keys::unread(user_id, room_id)], "unread")
            .await?;
        Ok(())
    }

    async fn cached_members(&self, key: &str, cache_type: &str) -> Option<Vec<String>> {
        match self.cache.backend().members(key).await {
            Ok(members) if !members.is_empty() => {
                CACHE_HITS.with_label_values(&[cache_type]).inc();
                return Some(members);
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Set cache read failed"),
        }
        CACHE_MISSES.with_label_values(&[cache_type]).inc();
        None
    }

    async fn fill_set(&self, key: &str, members: &[&str], class: DataClass) {
        if members.is_empty() {
            return;
        }
        let backend = self.cache.backend();
        for member in members {
            if let Err(e) = backend.add_to_set(key, member).await {
                warn!(key = %key, error = %e, "Failed to cache set member");
                // A partial set has no expiry and would be served as complete
                if let Err(e) = backend.delete(&[key.to_string()]).await {
                    warn!(key = %key, error = %e, "Failed to drop partial set");
                }
                return;
            }
        }
        if let Err(e) = backend.expire(key, self.cache.ttl().seconds(class)).await {
            warn!(key = %key, error = %e, "Failed to set set expiry");
        }
        debug!(key = %key, count = members.len(), "Cached set");
    }
}
