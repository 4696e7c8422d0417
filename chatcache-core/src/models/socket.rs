//! Ephemeral per-connection records
//!
//! None of these are durable: losing any of them degrades delivery but
//! never corrupts stored chat data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{MessageId, RoomId, UserId};

/// Connected user -> socket mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub user_id: UserId,
    pub socket_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl ConnectionRecord {
    #[must_use]
    pub fn new(user_id: UserId, socket_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            socket_id: socket_id.into(),
            connected_at: now,
            last_seen: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
}

/// In-flight generated response, keyed by the message it fills in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSession {
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: StreamingStatus,
    /// Partial content received so far
    pub content: String,
    /// Number of chunks received
    pub chunks: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamingSession {
    #[must_use]
    pub fn start(message_id: MessageId, room_id: RoomId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            message_id,
            room_id,
            user_id,
            status: StreamingStatus::Pending,
            content: String::new(),
            chunks: 0,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Shallow merge: every field present in the update replaces the
    /// current value wholesale.
    pub fn apply(&mut self, update: StreamingSessionUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(content) = update.content {
            self.content = content;
        }
        if let Some(chunks) = update.chunks {
            self.chunks = chunks;
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial streaming-session fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingSessionUpdate {
    pub status: Option<StreamingStatus>,
    pub content: Option<String>,
    pub chunks: Option<u32>,
    pub error: Option<String>,
}

/// Marker for a message waiting to be delivered to a recipient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedDelivery {
    pub queue_key: String,
    pub message_id: MessageId,
    pub room_id: RoomId,
    pub recipient_id: UserId,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}
