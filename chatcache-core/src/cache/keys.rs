//! Cache key naming
//!
//! Every instance sharing one cache backend must agree on these names, so
//! they carry no prefix and must not change.

use crate::models::{MessageId, RoomId, UserId};

/// Hash field holding the value of counter keys
pub const COUNTER_FIELD: &str = "count";

// ==================== Messages ====================

/// Single message
///
/// Type: String + TTL (message)
/// Value: `CacheValue::Message`
#[must_use]
pub fn message(message_id: &MessageId) -> String {
    format!("message:{message_id}")
}

/// Paginated history page
///
/// Type: String + TTL (message batch)
/// Value: `CacheValue::MessageBatch`
#[must_use]
pub fn messages_page(room_id: &RoomId, page: u32) -> String {
    format!("messages:{room_id}:{page}")
}

/// Recent-messages ring
///
/// Type: String + TTL (recent messages)
/// Value: `CacheValue::RecentMessages`
#[must_use]
pub fn recent(room_id: &RoomId) -> String {
    format!("recent:{room_id}")
}

/// Message count
///
/// Type: Hash + TTL (message count)
/// Field: [`COUNTER_FIELD`], decimal integer
#[must_use]
pub fn message_count(room_id: &RoomId) -> String {
    format!("msg_count:{room_id}")
}

// ==================== Rooms ====================

/// Room record
///
/// Type: String + TTL (room info)
#[must_use]
pub fn room(room_id: &RoomId) -> String {
    format!("room:{room_id}")
}

/// Room participants
///
/// Type: Set + TTL (room info)
/// Members: `user_id`
#[must_use]
pub fn participants(room_id: &RoomId) -> String {
    format!("participants:{room_id}")
}

/// Rooms a user belongs to
///
/// Type: Set + TTL (user rooms)
/// Members: `room_id`
#[must_use]
pub fn user_rooms(user_id: &UserId) -> String {
    format!("user_rooms:{user_id}")
}

/// Unread counter
///
/// Type: Hash + TTL (unread counter)
/// Field: [`COUNTER_FIELD`], decimal integer
#[must_use]
pub fn unread(user_id: &UserId, room_id: &RoomId) -> String {
    format!("unread:{user_id}:{room_id}")
}

// ==================== Socket State ====================

/// Connected user -> socket record
#[must_use]
pub fn connected_user(user_id: &UserId) -> String {
    format!("socket:connected_users:{user_id}")
}

/// Streaming session for an in-flight message
#[must_use]
pub fn streaming_session(message_id: &MessageId) -> String {
    format!("socket:streaming_sessions:{message_id}")
}

/// Room a user's socket is currently subscribed to
#[must_use]
pub fn socket_user_room(user_id: &UserId) -> String {
    format!("socket:user_rooms:{user_id}")
}

/// Delivery queue marker
#[must_use]
pub fn message_queue(queue_key: &str) -> String {
    format!("socket:message_queues:{queue_key}")
}

/// Delivery retry counter
///
/// Type: Hash + TTL (delivery queue)
/// Fields: attempts
#[must_use]
pub fn message_retries(queue_key: &str) -> String {
    format!("socket:message_retries:{queue_key}")
}

/// Presence set
///
/// Type: Set + TTL (presence), refreshed on every add
/// Members: `user_id`
#[must_use]
pub fn room_users(room_id: &RoomId) -> String {
    format!("socket:room_users:{room_id}")
}

/// Health probe
#[must_use]
pub fn health_probe(nonce: &str) -> String {
    format!("socket:health_check:{nonce}")
}

/// Namespaces holding codec-encoded string values, scanned by the scrubber
pub const STRING_VALUE_PATTERNS: [&str; 8] = [
    "message:*",
    "messages:*",
    "recent:*",
    "room:*",
    "socket:connected_users:*",
    "socket:streaming_sessions:*",
    "socket:user_rooms:*",
    "socket:message_queues:*",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_contract() {
        let room = RoomId::from("r1");
        let user = UserId::from("u1");
        let message_id = MessageId::from("m1");

        assert_eq!(message(&message_id), "message:m1");
        assert_eq!(messages_page(&room, 2), "messages:r1:2");
        assert_eq!(recent(&room), "recent:r1");
        assert_eq!(message_count(&room), "msg_count:r1");
        assert_eq!(super::room(&room), "room:r1");
        assert_eq!(participants(&room), "participants:r1");
        assert_eq!(user_rooms(&user), "user_rooms:u1");
        assert_eq!(unread(&user, &room), "unread:u1:r1");
        assert_eq!(connected_user(&user), "socket:connected_users:u1");
        assert_eq!(streaming_session(&message_id), "socket:streaming_sessions:m1");
        assert_eq!(socket_user_room(&user), "socket:user_rooms:u1");
        assert_eq!(message_queue("q1"), "socket:message_queues:q1");
        assert_eq!(message_retries("q1"), "socket:message_retries:q1");
        assert_eq!(room_users(&room), "socket:room_users:r1");
    }
}
