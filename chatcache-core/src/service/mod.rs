pub mod message_cache;
pub mod room_directory;

pub use message_cache::MessageCache;
pub use room_directory::RoomDirectory;
