//! Message cache repository
//!
//! Messages are always persisted to the document store first; the cache is
//! updated afterwards and a cache failure never fails the operation. Reads
//! are cache-aside: on a miss the store is queried and the result cached.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::room_directory::RoomDirectory;
use crate::cache::{keys, CacheValue, WriteThrough};
use crate::config::{DataClass, MessageCacheConfig};
use crate::metrics::cache::{CACHE_HITS, CACHE_MISSES};
use crate::models::{
    CachedMessageBatch, Message, MessageId, NewMessage, ReactionAction, RoomId, UserId,
};
use crate::store::MessageStore;
use crate::{Error, Result};

#[derive(Clone)]
pub struct MessageCache {
    cache: WriteThrough,
    store: Arc<dyn MessageStore>,
    directory: RoomDirectory,
    config: MessageCacheConfig,
}

impl std::fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MessageCache {
    #[must_use]
    pub fn new(
        cache: WriteThrough,
        store: Arc<dyn MessageStore>,
        directory: RoomDirectory,
        config: MessageCacheConfig,
    ) -> Self {
        Self {
            cache,
            store,
            directory,
            config,
        }
    }

    #[must_use]
    pub const fn directory(&self) -> &RoomDirectory {
        &self.directory
    }

    /// Persist a message and bring the room's cached views up to date
    ///
    /// A store failure is returned and nothing is cached.
    pub async fn save_message(&self, new: NewMessage) -> Result<Message> {
        let message = self.store.create_message(new).await?;
        let room_id = &message.room_id;

        if let Err(e) = self
            .cache
            .write_class(
                &keys::message(&message.id),
                &CacheValue::Message(message.clone()),
                DataClass::Message,
            )
            .await
        {
            warn!(message_id = %message.id, error = %e, "Failed to cache message");
        }

        if let Err(e) = self.append_recent(&message).await {
            warn!(room_id = %room_id, error = %e, "Failed to update recent messages");
        }

        if let Err(e) = self.increment_message_count(room_id).await {
            warn!(room_id = %room_id, error = %e, "Failed to update message count");
        }

        if let Err(e) = self
            .cache
            .invalidate(&[keys::messages_page(room_id, 0)], "message_batch")
            .await
        {
            warn!(room_id = %room_id, error = %e, "Failed to invalidate first page");
        }

        self.bump_unread(&message).await;

        debug!(message_id = %message.id, room_id = %room_id, "Message saved");
        Ok(message)
    }

    /// One page of history, ascending by timestamp
    ///
    /// With `before`, a cached page is used only if it reaches back to the
    /// cursor. Otherwise the store is queried for messages older than it.
    pub async fn get_messages_batch(
        &self,
        room_id: &RoomId,
        page: u32,
        limit: usize,
        before: Option<DateTime<Utc>>,
    ) -> Result<CachedMessageBatch> {
        let limit = if limit == 0 {
            self.config.default_page_size
        } else {
            limit
        };
        let key = keys::messages_page(room_id, page);

        match self.cache.backend().get_from_replica(&key).await {
            Ok(Some(CacheValue::MessageBatch(batch))) if batch.satisfies(before) => {
                CACHE_HITS.with_label_values(&["message_batch"]).inc();
                debug!(key = %key, "Message batch cache hit");
                return Ok(batch);
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Message batch cache read failed"),
        }
        CACHE_MISSES.with_label_values(&["message_batch"]).inc();

        let rows = self.store.list_messages(room_id, before, limit + 1).await?;
        let batch = CachedMessageBatch::from_descending(rows, limit);

        if let Err(e) = self
            .cache
            .write_class(
                &key,
                &CacheValue::MessageBatch(batch.clone()),
                DataClass::MessageBatch,
            )
            .await
        {
            warn!(key = %key, error = %e, "Failed to cache message batch");
        }
        Ok(batch)
    }

    /// Up to `limit` most recent messages, ascending
    pub async fn get_recent_messages(&self, room_id: &RoomId, limit: usize) -> Result<Vec<Message>> {
        let key = keys::recent(room_id);

        match self.cache.backend().get_from_replica(&key).await {
            Ok(Some(CacheValue::RecentMessages(ring))) if !ring.is_empty() => {
                CACHE_HITS.with_label_values(&["recent_messages"]).inc();
                let skip = ring.len().saturating_sub(limit);
                return Ok(ring.into_iter().skip(skip).collect());
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Recent messages cache read failed"),
        }
        CACHE_MISSES.with_label_values(&["recent_messages"]).inc();

        let mut messages = self.store.list_messages(room_id, None, limit).await?;
        messages.reverse();

        if !messages.is_empty() {
            if let Err(e) = self
                .cache
                .write_class(
                    &key,
                    &CacheValue::RecentMessages(messages.clone()),
                    DataClass::RecentMessages,
                )
                .await
            {
                warn!(key = %key, error = %e, "Failed to cache recent messages");
            }
        }
        Ok(messages)
    }

    /// Recent messages of many rooms, read concurrently
    ///
    /// A room whose read fails maps to an empty list.
    pub async fn get_batch_recent_messages(
        &self,
        room_ids: &[RoomId],
        limit: usize,
    ) -> HashMap<RoomId, Vec<Message>> {
        let reads = room_ids.iter().map(|room_id| async move {
            let messages = match self.get_recent_messages(room_id, limit).await {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(room_id = %room_id, error = %e, "Recent messages unavailable");
                    Vec::new()
                }
            };
            (room_id.clone(), messages)
        });
        join_all(reads).await.into_iter().collect()
    }

    /// Cached message count, recomputed from the store when absent
    pub async fn get_message_count(&self, room_id: &RoomId) -> Result<u64> {
        let key = keys::message_count(room_id);
        match self.cache.backend().hash_get(&key, keys::COUNTER_FIELD).await {
            Ok(Some(raw)) => match raw.parse::<u64>() {
                Ok(count) => {
                    CACHE_HITS.with_label_values(&["message_count"]).inc();
                    return Ok(count);
                }
                Err(_) => warn!(key = %key, value = %raw, "Cached message count is not a number"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Message count cache read failed"),
        }
        CACHE_MISSES.with_label_values(&["message_count"]).inc();
        self.recount(room_id).await
    }

    /// Atomically increment the cached count
    ///
    /// An absent counter is rebuilt from the store instead, which already
    /// includes the message being counted.
    pub async fn increment_message_count(&self, room_id: &RoomId) -> Result<u64> {
        let key = keys::message_count(room_id);
        let backend = self.cache.backend();
        if backend.hash_get(&key, keys::COUNTER_FIELD).await?.is_none() {
            return self.recount(room_id).await;
        }
        let next = backend.hash_increment(&key, keys::COUNTER_FIELD, 1).await?;
        backend
            .expire(&key, self.cache.ttl().seconds(DataClass::MessageCount))
            .await?;
        Ok(u64::try_from(next).unwrap_or(0))
    }

    async fn recount(&self, room_id: &RoomId) -> Result<u64> {
        let count = self.store.count_messages(room_id).await?;
        let key = keys::message_count(room_id);
        let backend = self.cache.backend();
        let cached = async {
            backend
                .hash_set(&key, keys::COUNTER_FIELD, &count.to_string())
                .await?;
            backend
                .expire(&key, self.cache.ttl().seconds(DataClass::MessageCount))
                .await
        }
        .await;
        if let Err(e) = cached {
            warn!(room_id = %room_id, error = %e, "Failed to cache message count");
        }
        Ok(count)
    }

    /// Record read receipts, returning how many messages the store changed
    pub async fn mark_messages_as_read(&self, ids: &[MessageId], user_id: &UserId) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let changed = self.store.mark_read(ids, user_id, Utc::now()).await?;

        let evicted: Vec<String> = ids.iter().map(keys::message).collect();
        if let Err(e) = self.cache.invalidate(&evicted, "message").await {
            warn!(user_id = %user_id, error = %e, "Failed to evict read messages");
        }

        debug!(user_id = %user_id, requested = ids.len(), changed, "Messages marked as read");
        Ok(changed)
    }

    pub async fn update_message_reaction(
        &self,
        message_id: &MessageId,
        reaction: &str,
        user_id: &UserId,
        action: ReactionAction,
    ) -> Result<Message> {
        if self.store.find_message(message_id).await?.is_none() {
            return Err(Error::NotFound(format!("Message {message_id} not found")));
        }
        let updated = self
            .store
            .toggle_reaction(message_id, reaction, user_id, action)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message {message_id} not found")))?;

        if let Err(e) = self
            .cache
            .write_class(
                &keys::message(message_id),
                &CacheValue::Message(updated.clone()),
                DataClass::Message,
            )
            .await
        {
            warn!(message_id = %message_id, error = %e, "Failed to re-cache message");
        }
        if let Err(e) = self.invalidate_pages(&updated.room_id).await {
            warn!(room_id = %updated.room_id, error = %e, "Failed to invalidate message pages");
        }
        Ok(updated)
    }

    /// Single message, cache-aside
    pub async fn get_message(&self, message_id: &MessageId) -> Result<Option<Message>> {
        let key = keys::message(message_id);
        match self.cache.get(&key).await {
            Ok(Some(CacheValue::Message(message))) => {
                CACHE_HITS.with_label_values(&["message"]).inc();
                return Ok(Some(message));
            }
            Ok(_) => {}
            Err(e) => warn!(key = %key, error = %e, "Message cache read failed"),
        }
        CACHE_MISSES.with_label_values(&["message"]).inc();

        let message = self.store.find_message(message_id).await?;
        if let Some(message) = &message {
            if let Err(e) = self
                .cache
                .write_class(&key, &CacheValue::Message(message.clone()), DataClass::Message)
                .await
            {
                warn!(key = %key, error = %e, "Failed to cache message");
            }
        }
        Ok(message)
    }

    pub async fn delete_message(&self, message_id: &MessageId) -> Result<()> {
        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Message {message_id} not found")))?;
        if !self.store.delete_message(message_id).await? {
            return Err(Error::NotFound(format!("Message {message_id} not found")));
        }

        if let Err(e) = self
            .cache
            .invalidate(&[keys::message(message_id)], "message")
            .await
        {
            warn!(message_id = %message_id, error = %e, "Failed to evict deleted message");
        }
        if let Err(e) = self.invalidate_room_cache(&message.room_id).await {
            warn!(room_id = %message.room_id, error = %e, "Failed to invalidate room cache");
        }
        info!(message_id = %message_id, room_id = %message.room_id, "Message deleted");
        Ok(())
    }

    /// Drop the leading history pages, the recent ring and the count
    ///
    /// Pages beyond `max_invalidated_pages` expire on their own TTL.
    pub async fn invalidate_room_cache(&self, room_id: &RoomId) -> Result<()> {
        let mut evicted = self.page_keys(room_id);
        evicted.push(keys::recent(room_id));
        evicted.push(keys::message_count(room_id));
        self.cache.invalidate(&evicted, "room_messages").await?;
        debug!(room_id = %room_id, "Room message cache invalidated");
        Ok(())
    }

    async fn invalidate_pages(&self, room_id: &RoomId) -> Result<()> {
        self.cache
            .invalidate(&self.page_keys(room_id), "message_batch")
            .await?;
        Ok(())
    }

    fn page_keys(&self, room_id: &RoomId) -> Vec<String> {
        (0..self.config.max_invalidated_pages)
            .map(|page| keys::messages_page(room_id, page))
            .collect()
    }

    /// Append to the recent ring, seeding it from the store when absent
    async fn append_recent(&self, message: &Message) -> Result<()> {
        let key = keys::recent(&message.room_id);
        let cap = self.config.recent_cap;

        let mut ring = match self.cache.get(&key).await? {
            Some(CacheValue::RecentMessages(ring)) => ring,
            _ => {
                let mut seeded = self.store.list_messages(&message.room_id, None, cap).await?;
                seeded.reverse();
                seeded
            }
        };

        if !ring.iter().any(|m| m.id == message.id) {
            ring.push(message.clone());
        }
        if ring.len() > cap {
            ring.drain(..ring.len() - cap);
        }

        self.cache
            .write_class(&key, &CacheValue::RecentMessages(ring), DataClass::RecentMessages)
            .await
    }

    async fn bump_unread(&self, message: &Message) {
        let participants = match self.directory.get_participants(&message.room_id).await {
            Ok(participants) => participants,
            Err(e) => {
                warn!(room_id = %message.room_id, error = %e, "Skipping unread counters");
                return;
            }
        };

        let bumps = participants
            .iter()
            .filter(|user_id| **user_id != message.sender_id)
            .map(|user_id| async move {
                if let Err(e) = self.directory.increment_unread(user_id, &message.room_id).await {
                    warn!(user_id = %user_id, error = %e, "Failed to bump unread counter");
                }
            });
        join_all(bumps).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheValue};
    use crate::config::TtlConfig;
    use crate::store::MockMessageStore;
    use crate::test_helpers::{base_time, message_cache, test_room_id, test_user_id, InMemoryStore};
    use chrono::Duration;

    async fn save_n(cache: &MessageCache, room: &str, n: usize) -> Vec<Message> {
        let mut saved = Vec::with_capacity(n);
        for i in 0..n {
            saved.push(
                cache
                    .save_message(NewMessage::user(
                        test_room_id(room),
                        test_user_id("alice"),
                        format!("message {i}"),
                    ))
                    .await
                    .unwrap(),
            );
        }
        saved
    }

    #[tokio::test]
    async fn test_save_then_get_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, backend) = message_cache(store.clone());

        let saved = save_n(&cache, "r1", 1).await.remove(0);
        let cached = backend
            .get(&keys::message(&saved.id))
            .await
            .unwrap()
            .and_then(CacheValue::into_message);
        assert_eq!(cached.as_ref(), Some(&saved));
        assert_eq!(cache.get_message(&saved.id).await.unwrap(), Some(saved));
    }

    #[tokio::test]
    async fn test_store_failure_caches_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store.fail_room(&test_room_id("r1"));
        let (cache, backend) = message_cache(store);

        let result = cache
            .save_message(NewMessage::user(test_room_id("r1"), test_user_id("alice"), "hi"))
            .await;
        assert!(matches!(result, Err(Error::Store(_))));
        assert_eq!(backend.memory_entries(), 0);
    }

    #[tokio::test]
    async fn test_recent_ring_scenario() {
        let (cache, _) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");

        let first = save_n(&cache, "r1", 1).await;
        assert_eq!(cache.get_recent_messages(&room, 20).await.unwrap(), first);

        let mut all = first;
        all.extend(save_n(&cache, "r1", 20).await);
        let recent = cache.get_recent_messages(&room, 20).await.unwrap();
        assert_eq!(recent, all[1..].to_vec());
        assert!(recent.windows(2).all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn test_recent_ring_is_capped() {
        let (cache, backend) = message_cache(Arc::new(InMemoryStore::new()));
        let saved = save_n(&cache, "r1", 60).await;

        let ring = backend
            .get(&keys::recent(&test_room_id("r1")))
            .await
            .unwrap()
            .and_then(CacheValue::into_recent_messages)
            .unwrap();
        assert_eq!(ring.len(), 50);
        assert_eq!(ring.first(), saved.get(10));
        assert_eq!(ring.last(), saved.last());
    }

    #[tokio::test]
    async fn test_batch_has_more() {
        let (cache, _) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");

        save_n(&cache, "r1", 30).await;
        let batch = cache.get_messages_batch(&room, 0, 30, None).await.unwrap();
        assert!(!batch.has_more);
        assert_eq!(batch.messages.len(), 30);

        // Saving evicts page 0, so the next read sees 31 rows
        save_n(&cache, "r1", 1).await;
        let batch = cache.get_messages_batch(&room, 0, 30, None).await.unwrap();
        assert!(batch.has_more);
        assert_eq!(batch.messages.len(), 30);
        assert!(batch
            .messages
            .windows(2)
            .all(|w| w[0].created_at < w[1].created_at));
    }

    #[tokio::test]
    async fn test_batch_freshness_boundary() {
        let (cache, _) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");
        save_n(&cache, "r1", 5).await;

        let cached = cache.get_messages_batch(&room, 1, 3, None).await.unwrap();
        let oldest = cached.oldest_timestamp.unwrap();
        assert_eq!(oldest, base_time() + Duration::seconds(3));

        for cursor in [oldest, oldest + Duration::seconds(1)] {
            let hit = cache.get_messages_batch(&room, 1, 3, Some(cursor)).await.unwrap();
            assert_eq!(hit, cached);
        }

        // One second older than the cached page: the store answers
        let miss = cache
            .get_messages_batch(&room, 1, 3, Some(oldest - Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(miss.messages.len(), 1);
        assert!(!miss.has_more);
    }

    #[tokio::test]
    async fn test_empty_batch_with_cursor_is_a_miss() {
        let (cache, _) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");

        let empty = cache.get_messages_batch(&room, 2, 10, None).await.unwrap();
        assert!(empty.messages.is_empty());

        save_n(&cache, "r1", 2).await;
        let batch = cache
            .get_messages_batch(&room, 2, 10, Some(base_time() + Duration::seconds(60)))
            .await
            .unwrap();
        assert_eq!(batch.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (cache, _) = message_cache(Arc::new(InMemoryStore::new()));
        let ids: Vec<MessageId> = save_n(&cache, "r1", 3).await.into_iter().map(|m| m.id).collect();
        let bob = test_user_id("bob");

        assert_eq!(cache.mark_messages_as_read(&ids, &bob).await.unwrap(), 3);
        assert_eq!(cache.mark_messages_as_read(&ids, &bob).await.unwrap(), 0);
        assert_eq!(cache.mark_messages_as_read(&[], &bob).await.unwrap(), 0);

        let reloaded = cache.get_message(&ids[0]).await.unwrap().unwrap();
        assert!(reloaded.is_read_by(&bob));
    }

    #[tokio::test]
    async fn test_count_heals_with_single_store_query() {
        let room = test_room_id("r1");
        let mut store = MockMessageStore::new();
        store.expect_count_messages().times(1).returning(|_| Ok(5));

        let backend = Arc::new(CacheBackend::in_memory());
        let write_through = WriteThrough::new(backend, TtlConfig::default());
        let store: Arc<dyn MessageStore> = Arc::new(store);
        let directory = RoomDirectory::new(write_through.clone(), store.clone());
        let cache = MessageCache::new(write_through, store, directory, MessageCacheConfig::default());

        assert_eq!(cache.get_message_count(&room).await.unwrap(), 5);
        assert_eq!(cache.get_message_count(&room).await.unwrap(), 5);
        assert_eq!(cache.increment_message_count(&room).await.unwrap(), 6);
        assert_eq!(cache.get_message_count(&room).await.unwrap(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let room = test_room_id("r1");
        let mut store = MockMessageStore::new();
        store.expect_count_messages().times(1).returning(|_| Ok(10));

        let backend = Arc::new(CacheBackend::in_memory());
        let write_through = WriteThrough::new(backend, TtlConfig::default());
        let store: Arc<dyn MessageStore> = Arc::new(store);
        let directory = RoomDirectory::new(write_through.clone(), store.clone());
        let cache = MessageCache::new(write_through, store, directory, MessageCacheConfig::default());
        assert_eq!(cache.get_message_count(&room).await.unwrap(), 10);

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                let room = room.clone();
                tokio::spawn(async move { cache.increment_message_count(&room).await.unwrap() })
            })
            .collect();
        let mut seen: Vec<u64> = join_all(tasks).await.into_iter().map(std::result::Result::unwrap).collect();
        seen.sort_unstable();

        assert_eq!(seen, (11..=60).collect::<Vec<u64>>());
        assert_eq!(cache.get_message_count(&room).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_reaction_on_missing_message() {
        let mut store = MockMessageStore::new();
        store.expect_find_message().returning(|_| Ok(None));
        store.expect_toggle_reaction().never();
        let (cache, _) = message_cache(Arc::new(store));

        let result = cache
            .update_message_reaction(&MessageId::from("nope"), "👍", &test_user_id("bob"), ReactionAction::Add)
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reaction_updates_cache_and_pages() {
        let (cache, backend) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");
        let saved = save_n(&cache, "r1", 2).await;
        cache.get_messages_batch(&room, 3, 10, None).await.unwrap();

        let updated = cache
            .update_message_reaction(&saved[0].id, "🎉", &test_user_id("bob"), ReactionAction::Add)
            .await
            .unwrap();
        assert_eq!(updated.reactions["🎉"], vec![test_user_id("bob")]);

        let cached = backend
            .get(&keys::message(&saved[0].id))
            .await
            .unwrap()
            .and_then(CacheValue::into_message);
        assert_eq!(cached, Some(updated));
        assert!(backend.get(&keys::messages_page(&room, 3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_recent_partial_failure() {
        let store = Arc::new(InMemoryStore::new());
        let (cache, _) = message_cache(store.clone());
        save_n(&cache, "r1", 2).await;
        save_n(&cache, "r2", 1).await;
        cache.invalidate_room_cache(&test_room_id("r2")).await.unwrap();
        store.fail_room(&test_room_id("r2"));

        let rooms = [test_room_id("r1"), test_room_id("r2"), test_room_id("r3")];
        let result = cache.get_batch_recent_messages(&rooms, 10).await;
        assert_eq!(result.len(), 3);
        assert_eq!(result[&rooms[0]].len(), 2);
        assert!(result[&rooms[1]].is_empty());
        assert!(result[&rooms[2]].is_empty());
    }

    #[tokio::test]
    async fn test_delete_message_invalidates_room() {
        let (cache, backend) = message_cache(Arc::new(InMemoryStore::new()));
        let room = test_room_id("r1");
        let saved = save_n(&cache, "r1", 2).await;

        cache.delete_message(&saved[1].id).await.unwrap();
        assert!(backend.get(&keys::message(&saved[1].id)).await.unwrap().is_none());
        assert!(backend.get(&keys::recent(&room)).await.unwrap().is_none());
        assert_eq!(cache.get_message_count(&room).await.unwrap(), 1);
        assert!(matches!(
            cache.delete_message(&saved[1].id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_bumps_unread_for_other_participants() {
        let store = InMemoryStore::new().with_room("r1", &["alice", "bob", "carol"]);
        let (cache, _) = message_cache(Arc::new(store));
        save_n(&cache, "r1", 2).await;

        let room = test_room_id("r1");
        let directory = cache.directory();
        assert_eq!(directory.get_unread(&test_user_id("alice"), &room).await.unwrap(), 0);
        assert_eq!(directory.get_unread(&test_user_id("bob"), &room).await.unwrap(), 2);
        assert_eq!(directory.get_unread(&test_user_id("carol"), &room).await.unwrap(), 2);
    }
}
