pub mod backend;
pub mod codec;
pub mod keys;
pub mod memory;
pub mod redis_node;
pub mod shard_router;
pub mod write_through;

pub use backend::{BackendMode, CacheBackend};
pub use codec::{CacheValue, CodecError};
pub use memory::MemoryStore;
pub use shard_router::ShardRouter;
pub use write_through::WriteThrough;
