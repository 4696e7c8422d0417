//! Ephemeral socket state shared by every gateway instance
//!
//! The cache is the only copy of this state. Every record carries its own
//! TTL and losing one only degrades delivery.

use std::future::Future;
use std::pin::Pin;

use chatcache_core::cache::{keys, CacheValue, WriteThrough};
use chatcache_core::config::DataClass;
use chatcache_core::models::{
    ConnectionRecord, MessageId, QueuedDelivery, RoomId, StreamingSession,
    StreamingSessionUpdate, UserId,
};
use chrono::Utc;
use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::error::Result;

const RETRY_FIELD: &str = "attempts";

type Removal<'a> = Pin<Box<dyn Future<Output = (&'static str, Result<()>)> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct ConnectionStateStore {
    cache: WriteThrough,
}

impl ConnectionStateStore {
    #[must_use]
    pub const fn new(cache: WriteThrough) -> Self {
        Self { cache }
    }

    async fn write(&self, key: &str, value: CacheValue, class: DataClass) -> Result<()> {
        self.cache.write_class(key, &value, class).await?;
        Ok(())
    }

    async fn remove(&self, key: String, cache_type: &str) -> Result<()> {
        self.cache.invalidate(&[key], cache_type).await?;
        Ok(())
    }

    // ==================== Connected users ====================

    pub async fn set_connected_user(&self, record: &ConnectionRecord) -> Result<()> {
        self.write(
            &keys::connected_user(&record.user_id),
            CacheValue::Connection(record.clone()),
            DataClass::Presence,
        )
        .await
    }

    pub async fn get_connected_user(&self, user_id: &UserId) -> Result<Option<ConnectionRecord>> {
        let value = self.cache.get(&keys::connected_user(user_id)).await?;
        Ok(value.and_then(CacheValue::into_connection))
    }

    pub async fn remove_connected_user(&self, user_id: &UserId) -> Result<()> {
        self.remove(keys::connected_user(user_id), "connection").await
    }

    /// Refresh `last_seen` and the record TTL; false if not connected
    pub async fn touch_connection(&self, user_id: &UserId) -> Result<bool> {
        let Some(mut record) = self.get_connected_user(user_id).await? else {
            return Ok(false);
        };
        record.last_seen = Utc::now();
        self.set_connected_user(&record).await?;
        Ok(true)
    }

    pub async fn is_user_connected(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.get_connected_user(user_id).await?.is_some())
    }

    // ==================== Active room ====================

    pub async fn set_user_room(&self, user_id: &UserId, room_id: &RoomId) -> Result<()> {
        self.write(
            &keys::socket_user_room(user_id),
            CacheValue::ActiveRoom(room_id.clone()),
            DataClass::Presence,
        )
        .await
    }

    pub async fn get_user_room(&self, user_id: &UserId) -> Result<Option<RoomId>> {
        let value = self.cache.get(&keys::socket_user_room(user_id)).await?;
        Ok(value.and_then(CacheValue::into_active_room))
    }

    pub async fn remove_user_room(&self, user_id: &UserId) -> Result<()> {
        self.remove(keys::socket_user_room(user_id), "active_room").await
    }

    // ==================== Presence ====================

    /// Add a user to a room's presence set and restart the set's TTL
    pub async fn add_user_to_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<()> {
        let key = keys::room_users(room_id);
        let backend = self.cache.backend();
        backend.add_to_set(&key, user_id.as_str()).await?;
        backend
            .expire(&key, self.cache.ttl().seconds(DataClass::Presence))
            .await?;
        Ok(())
    }

    pub async fn remove_user_from_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .cache
            .backend()
            .remove_from_set(&keys::room_users(room_id), user_id.as_str())
            .await?)
    }

    pub async fn get_room_users(&self, room_id: &RoomId) -> Result<Vec<UserId>> {
        let members = self.cache.backend().members(&keys::room_users(room_id)).await?;
        Ok(members.into_iter().map(UserId::from).collect())
    }

    pub async fn is_user_in_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .cache
            .backend()
            .is_member(&keys::room_users(room_id), user_id.as_str())
            .await?)
    }

    // ==================== Streaming sessions ====================

    pub async fn set_streaming_session(&self, session: &StreamingSession) -> Result<()> {
        self.write(
            &keys::streaming_session(&session.message_id),
            CacheValue::Session(session.clone()),
            DataClass::StreamingSession,
        )
        .await
    }

    pub async fn get_streaming_session(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<StreamingSession>> {
        let value = self.cache.get(&keys::streaming_session(message_id)).await?;
        Ok(value.and_then(CacheValue::into_session))
    }

    /// Merge `update` into an existing session and rewrite it
    ///
    /// Returns false without writing anything if no session exists, so a
    /// late update never resurrects a finished session.
    pub async fn update_streaming_session(
        &self,
        message_id: &MessageId,
        update: StreamingSessionUpdate,
    ) -> Result<bool> {
        let Some(mut session) = self.get_streaming_session(message_id).await? else {
            debug!(message_id = %message_id, "No streaming session to update");
            return Ok(false);
        };
        session.apply(update);
        self.set_streaming_session(&session).await?;
        Ok(true)
    }

    pub async fn remove_streaming_session(&self, message_id: &MessageId) -> Result<()> {
        self.remove(keys::streaming_session(message_id), "streaming_session")
            .await
    }

    // ==================== Delivery queues ====================

    pub async fn queue_message(&self, delivery: &QueuedDelivery) -> Result<()> {
        self.write(
            &keys::message_queue(&delivery.queue_key),
            CacheValue::Queue(delivery.clone()),
            DataClass::DeliveryQueue,
        )
        .await
    }

    pub async fn get_queued_message(&self, queue_key: &str) -> Result<Option<QueuedDelivery>> {
        let value = self.cache.get(&keys::message_queue(queue_key)).await?;
        Ok(value.and_then(CacheValue::into_queue))
    }

    pub async fn remove_queued_message(&self, queue_key: &str) -> Result<()> {
        self.remove(keys::message_queue(queue_key), "delivery_queue").await
    }

    /// Count one more delivery attempt, restarting the counter's TTL
    pub async fn increment_retry(&self, queue_key: &str) -> Result<u64> {
        let key = keys::message_retries(queue_key);
        let backend = self.cache.backend();
        let attempts = backend.hash_increment(&key, RETRY_FIELD, 1).await?;
        backend
            .expire(&key, self.cache.ttl().seconds(DataClass::DeliveryQueue))
            .await?;
        Ok(u64::try_from(attempts).unwrap_or(0))
    }

    pub async fn get_retry_count(&self, queue_key: &str) -> Result<u64> {
        let value = self
            .cache
            .backend()
            .hash_get(&keys::message_retries(queue_key), RETRY_FIELD)
            .await?;
        Ok(value.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    pub async fn clear_retries(&self, queue_key: &str) -> Result<()> {
        self.remove(keys::message_retries(queue_key), "delivery_retries")
            .await
    }

    // ==================== Cleanup ====================

    /// Drop everything held for a disconnected user
    ///
    /// Sub-removals run concurrently and independently. Returns false if
    /// any of them failed; the others still took effect.
    pub async fn cleanup_user_data(&self, user_id: &UserId) -> bool {
        let active_room = match self.get_user_room(user_id).await {
            Ok(room) => room,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Could not read active room during cleanup");
                None
            }
        };

        let mut removals: Vec<Removal<'_>> = vec![
            async { ("connected_user", self.remove_connected_user(user_id).await) }.boxed(),
            async { ("active_room", self.remove_user_room(user_id).await) }.boxed(),
        ];
        if let Some(room_id) = active_room {
            removals.push(
                async move {
                    let result = self.remove_user_from_room(&room_id, user_id).await;
                    ("presence", result.map(|_| ()))
                }
                .boxed(),
            );
        }

        Self::run_removals(removals, "user", user_id.as_str()).await
    }

    /// Drop a user's presence in one room
    ///
    /// The active-room record is cleared only if it points at this room.
    pub async fn cleanup_room_data(&self, room_id: &RoomId, user_id: &UserId) -> bool {
        let removals: Vec<Removal<'_>> = vec![
            async {
                let result = self.remove_user_from_room(room_id, user_id).await;
                ("presence", result.map(|_| ()))
            }
            .boxed(),
            async {
                let result = match self.get_user_room(user_id).await {
                    Ok(Some(active)) if &active == room_id => self.remove_user_room(user_id).await,
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                };
                ("active_room", result)
            }
            .boxed(),
        ];

        Self::run_removals(removals, "room", room_id.as_str()).await
    }

    async fn run_removals(removals: Vec<Removal<'_>>, scope: &str, id: &str) -> bool {
        let mut ok = true;
        for (step, result) in join_all(removals).await {
            if let Err(e) = result {
                warn!(scope, id, step, error = %e, "Socket state cleanup step failed");
                ok = false;
            }
        }
        ok
    }

    // ==================== Health ====================

    /// Write a probe key, read it back and delete it
    ///
    /// Healthy only if the value read back matches exactly.
    pub async fn health_check(&self) -> bool {
        let nonce = nanoid::nanoid!(16);
        let key = keys::health_probe(&nonce);

        let result: Result<bool> = async {
            self.write(&key, CacheValue::Text(nonce.clone()), DataClass::HealthProbe)
                .await?;
            let read_back = self.cache.get(&key).await?.and_then(CacheValue::into_text);
            self.remove(key.clone(), "health_probe").await?;
            Ok(read_back.as_deref() == Some(nonce.as_str()))
        }
        .await;

        match result {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error = %e, "Cache health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcache_core::cache::CacheBackend;
    use chatcache_core::config::TtlConfig;
    use chatcache_core::models::StreamingStatus;
    use std::sync::Arc;
    use std::time::Duration;

    fn state() -> ConnectionStateStore {
        ConnectionStateStore::new(WriteThrough::new(
            Arc::new(CacheBackend::in_memory()),
            TtlConfig::default(),
        ))
    }

    fn ids() -> (UserId, RoomId) {
        (UserId::from("alice"), RoomId::from("r1"))
    }

    #[tokio::test]
    async fn test_connected_user_lifecycle() {
        let state = state();
        let (user, _) = ids();
        let record = ConnectionRecord::new(user.clone(), "socket-1");

        state.set_connected_user(&record).await.unwrap();
        assert_eq!(state.get_connected_user(&user).await.unwrap(), Some(record.clone()));
        assert!(state.touch_connection(&user).await.unwrap());
        let touched = state.get_connected_user(&user).await.unwrap().unwrap();
        assert!(touched.last_seen >= record.last_seen);

        state.remove_connected_user(&user).await.unwrap();
        assert!(!state.is_user_connected(&user).await.unwrap());
        assert!(!state.touch_connection(&user).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_ttl_refreshes_on_add() {
        let state = state();
        let room = RoomId::from("r1");
        let ttl = TtlConfig::default().presence;

        state.add_user_to_room(&room, &UserId::from("alice")).await.unwrap();
        tokio::time::advance(Duration::from_secs(ttl - 1)).await;
        state.add_user_to_room(&room, &UserId::from("bob")).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(
            state.get_room_users(&room).await.unwrap(),
            vec![UserId::from("alice"), UserId::from("bob")]
        );

        tokio::time::advance(Duration::from_secs(ttl)).await;
        assert!(state.get_room_users(&room).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presence_membership() {
        let state = state();
        let (user, room) = ids();
        state.add_user_to_room(&room, &user).await.unwrap();
        assert!(state.is_user_in_room(&room, &user).await.unwrap());
        assert!(state.remove_user_from_room(&room, &user).await.unwrap());
        assert!(!state.remove_user_from_room(&room, &user).await.unwrap());
        assert!(!state.is_user_in_room(&room, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_streaming_update_requires_existing_session() {
        let state = state();
        let (user, room) = ids();
        let message_id = MessageId::from("m1");
        let update = StreamingSessionUpdate {
            status: Some(StreamingStatus::Completed),
            ..Default::default()
        };

        assert!(!state.update_streaming_session(&message_id, update.clone()).await.unwrap());
        assert!(state.get_streaming_session(&message_id).await.unwrap().is_none());

        let session = StreamingSession::start(message_id.clone(), room, user);
        state.set_streaming_session(&session).await.unwrap();
        state
            .update_streaming_session(
                &message_id,
                StreamingSessionUpdate {
                    content: Some("partial".to_string()),
                    chunks: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(state.update_streaming_session(&message_id, update).await.unwrap());

        let stored = state.get_streaming_session(&message_id).await.unwrap().unwrap();
        assert_eq!(stored.status, StreamingStatus::Completed);
        assert_eq!(stored.content, "partial");
        assert_eq!(stored.chunks, 2);

        state.remove_streaming_session(&message_id).await.unwrap();
        assert!(state.get_streaming_session(&message_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delivery_queue_and_retries() {
        let state = state();
        let (user, room) = ids();
        let delivery = QueuedDelivery {
            queue_key: "q1".to_string(),
            message_id: MessageId::from("m1"),
            room_id: room,
            recipient_id: user,
            queued_at: Utc::now(),
            payload: serde_json::json!({"attempt": "first"}),
        };

        state.queue_message(&delivery).await.unwrap();
        assert_eq!(state.get_queued_message("q1").await.unwrap(), Some(delivery));

        assert_eq!(state.get_retry_count("q1").await.unwrap(), 0);
        assert_eq!(state.increment_retry("q1").await.unwrap(), 1);
        assert_eq!(state.increment_retry("q1").await.unwrap(), 2);
        assert_eq!(state.get_retry_count("q1").await.unwrap(), 2);

        state.clear_retries("q1").await.unwrap();
        state.remove_queued_message("q1").await.unwrap();
        assert_eq!(state.get_retry_count("q1").await.unwrap(), 0);
        assert!(state.get_queued_message("q1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_user_data() {
        let state = state();
        let (user, room) = ids();
        state
            .set_connected_user(&ConnectionRecord::new(user.clone(), "s1"))
            .await
            .unwrap();
        state.set_user_room(&user, &room).await.unwrap();
        state.add_user_to_room(&room, &user).await.unwrap();

        assert!(state.cleanup_user_data(&user).await);
        assert!(!state.is_user_connected(&user).await.unwrap());
        assert!(state.get_user_room(&user).await.unwrap().is_none());
        assert!(!state.is_user_in_room(&room, &user).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_steps_are_independent() {
        let state = state();
        let (user, room) = ids();
        state.set_user_room(&user, &room).await.unwrap();
        state
            .set_connected_user(&ConnectionRecord::new(user.clone(), "s1"))
            .await
            .unwrap();
        // A string where the presence set should be makes that step fail
        state
            .cache
            .backend()
            .set_raw(&keys::room_users(&room), "oops", 60)
            .await
            .unwrap();

        assert!(!state.cleanup_room_data(&room, &user).await);
        assert!(state.get_user_room(&user).await.unwrap().is_none());

        state.set_user_room(&user, &room).await.unwrap();
        assert!(!state.cleanup_user_data(&user).await);
        assert!(!state.is_user_connected(&user).await.unwrap());
        assert!(state.get_user_room(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_room_keeps_other_active_room() {
        let state = state();
        let (user, room) = ids();
        let other = RoomId::from("r2");
        state.set_user_room(&user, &other).await.unwrap();
        state.add_user_to_room(&room, &user).await.unwrap();

        assert!(state.cleanup_room_data(&room, &user).await);
        assert_eq!(state.get_user_room(&user).await.unwrap(), Some(other));
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = state();
        assert!(state.health_check().await);
        assert_eq!(state.cache.backend().memory_entries(), 0);
    }
}
