//! Serialization boundary for cached values
//!
//! Every string value in the cache is one of a closed set of tagged
//! variants, encoded as JSON text. Anything that does not decode is
//! treated as corrupted by the backend.

use serde::{Deserialize, Serialize};

use crate::models::{
    CachedMessageBatch, ConnectionRecord, Message, QueuedDelivery, Room, RoomId, StreamingSession,
};

/// Placeholders written by broken serializers upstream
const KNOWN_BAD_VALUES: [&str; 4] = ["[object Object]", "undefined", "NaN", "null"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CacheValue {
    Text(String),
    Message(Message),
    MessageBatch(CachedMessageBatch),
    RecentMessages(Vec<Message>),
    Count(u64),
    Room(Room),
    Connection(ConnectionRecord),
    ActiveRoom(RoomId),
    Session(StreamingSession),
    Queue(QueuedDelivery),
}

/// Why a raw value could not be decoded
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("placeholder value {0:?}")]
    Placeholder(String),

    #[error("malformed value: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl CacheValue {
    /// Variant name, used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Message(_) => "message",
            Self::MessageBatch(_) => "message_batch",
            Self::RecentMessages(_) => "recent_messages",
            Self::Count(_) => "count",
            Self::Room(_) => "room",
            Self::Connection(_) => "connection",
            Self::ActiveRoom(_) => "active_room",
            Self::Session(_) => "session",
            Self::Queue(_) => "queue",
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        if is_placeholder(raw) {
            return Err(CodecError::Placeholder(raw.to_string()));
        }
        Ok(serde_json::from_str(raw)?)
    }

    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_message_batch(self) -> Option<CachedMessageBatch> {
        match self {
            Self::MessageBatch(batch) => Some(batch),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_recent_messages(self) -> Option<Vec<Message>> {
        match self {
            Self::RecentMessages(messages) => Some(messages),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(count) => Some(*count),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_room(self) -> Option<Room> {
        match self {
            Self::Room(room) => Some(room),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_connection(self) -> Option<ConnectionRecord> {
        match self {
            Self::Connection(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_active_room(self) -> Option<RoomId> {
        match self {
            Self::ActiveRoom(room_id) => Some(room_id),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_session(self) -> Option<StreamingSession> {
        match self {
            Self::Session(session) => Some(session),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_queue(self) -> Option<QueuedDelivery> {
        match self {
            Self::Queue(delivery) => Some(delivery),
            _ => None,
        }
    }
}

/// Whether a raw value is a known-bad placeholder
#[must_use]
pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || KNOWN_BAD_VALUES.contains(&trimmed)
        || (trimmed.starts_with("[object ") && trimmed.ends_with(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageId, UserId};

    #[test]
    fn test_text_roundtrip() {
        let value = CacheValue::Text("v".to_string());
        let raw = value.encode().unwrap();
        assert_eq!(raw, r#"{"type":"text","data":"v"}"#);
        assert_eq!(CacheValue::decode(&raw).unwrap(), value);
    }

    #[test]
    fn test_session_roundtrip() {
        let session = StreamingSession::start(
            MessageId::from("m1"),
            RoomId::from("r1"),
            UserId::from("u1"),
        );
        let value = CacheValue::Session(session.clone());
        let decoded = CacheValue::decode(&value.encode().unwrap()).unwrap();
        assert_eq!(decoded.into_session(), Some(session));
    }

    #[test]
    fn test_placeholders_rejected() {
        for raw in ["[object Object]", "[object Array]", "undefined", "", "  NaN "] {
            assert!(
                matches!(CacheValue::decode(raw), Err(CodecError::Placeholder(_))),
                "{raw:?} should be a placeholder"
            );
        }
    }

    #[test]
    fn test_untagged_json_is_malformed() {
        assert!(matches!(
            CacheValue::decode(r#"{"id":"m1"}"#),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(CacheValue::decode("{not json"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn test_wrong_variant_accessor() {
        let value = CacheValue::Count(3);
        assert_eq!(value.as_count(), Some(3));
        assert!(value.into_message().is_none());
    }
}
