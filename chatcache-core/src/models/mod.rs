pub mod id;
pub mod message;
pub mod room;
pub mod socket;

pub use id::{generate_id, MessageId, RoomId, UserId};
pub use message::{CachedMessageBatch, Message, MessageKind, NewMessage, ReactionAction, ReadReceipt};
pub use room::Room;
pub use socket::{
    ConnectionRecord, QueuedDelivery, StreamingSession, StreamingSessionUpdate, StreamingStatus,
};
