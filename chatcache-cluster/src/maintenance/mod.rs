//! Background maintenance and operator jobs

pub mod benchmark;
pub mod health;
pub mod scheduler;
pub mod scrubber;

use chatcache_core::cache::CacheBackend;
use tracing::warn;

use crate::error::Result;

pub use benchmark::{Benchmark, BenchmarkReport};
pub use health::{HealthJob, HealthReport};
pub use scheduler::MaintenanceScheduler;
pub use scrubber::{ScrubReport, Scrubber};

/// Drop every cached entry on every node
pub async fn emergency_flush(backend: &CacheBackend) -> Result<()> {
    warn!(mode = %backend.mode(), "Emergency flush of all cache data");
    backend.flush_all().await?;
    Ok(())
}
