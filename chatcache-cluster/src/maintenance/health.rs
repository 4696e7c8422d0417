//! Cache health check job

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chatcache_core::cache::{BackendMode, CacheBackend};
use chatcache_core::metrics::backend::HEALTH_STATUS;
use tracing::{debug, info, warn};

use crate::state::ConnectionStateStore;

const UNKNOWN: u8 = 0;
const HEALTHY: u8 = 1;
const UNHEALTHY: u8 = 2;

/// Outcome of one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// Round trip passed, every node answered and the backend is not degraded
    pub healthy: bool,
    /// Write/read/delete round trip passed on whichever store is active
    pub check_ok: bool,
    pub mode: BackendMode,
    pub latency: Duration,
}

pub struct HealthJob {
    state: ConnectionStateStore,
    backend: Arc<CacheBackend>,
    last: AtomicU8,
}

impl HealthJob {
    #[must_use]
    pub const fn new(state: ConnectionStateStore, backend: Arc<CacheBackend>) -> Self {
        Self {
            state,
            backend,
            last: AtomicU8::new(UNKNOWN),
        }
    }

    /// Run the write/read/delete round trip, plus a PING of every node while
    /// clustered. A degraded backend is never reported healthy, even though
    /// the memory store answers. Logs only on healthy/unhealthy transitions.
    pub async fn run(&self) -> HealthReport {
        let started = Instant::now();
        let check_ok = self.state.health_check().await;

        let mode = self.backend.mode();
        let mut nodes_ok = true;
        if check_ok && mode == BackendMode::Clustered {
            if let Err(e) = self.backend.ping().await {
                warn!(error = %e, "Cache node ping failed");
                nodes_ok = false;
            }
        }
        let healthy = check_ok && nodes_ok && mode != BackendMode::Degraded;
        let latency = started.elapsed();

        HEALTH_STATUS.set(i64::from(healthy));
        let current = if healthy { HEALTHY } else { UNHEALTHY };
        let previous = self.last.swap(current, Ordering::Relaxed);
        match (previous, healthy) {
            (UNHEALTHY, true) => info!(%mode, ?latency, "Cache health restored"),
            (UNKNOWN | HEALTHY, false) => warn!(%mode, "Cache health check failing"),
            _ => debug!(%mode, healthy, ?latency, "Cache health check"),
        }

        HealthReport {
            healthy,
            check_ok,
            mode,
            latency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatcache_core::cache::WriteThrough;
    use chatcache_core::config::{CacheConfig, TtlConfig};
    use chatcache_core::test_helpers::StubRedis;

    fn job(backend: &Arc<CacheBackend>) -> HealthJob {
        let state = ConnectionStateStore::new(WriteThrough::new(backend.clone(), TtlConfig::default()));
        HealthJob::new(state, backend.clone())
    }

    #[tokio::test]
    async fn test_memory_backend_is_healthy() {
        let backend = Arc::new(CacheBackend::in_memory());
        let job = job(&backend);

        let report = job.run().await;
        assert!(report.healthy);
        assert!(report.check_ok);
        assert_eq!(report.mode, BackendMode::Standalone);
        assert_eq!(job.last.load(Ordering::Relaxed), HEALTHY);
    }

    #[tokio::test]
    async fn test_degraded_backend_is_unhealthy() {
        let node = StubRedis::start().await;
        let config = CacheConfig {
            write_nodes: vec![node.url()],
            ..CacheConfig::default()
        };
        let backend = Arc::new(CacheBackend::connect(&config).await.unwrap());
        let job = job(&backend);

        let report = job.run().await;
        assert!(report.healthy);
        assert_eq!(report.mode, BackendMode::Clustered);

        backend.force_demote("test");
        let report = job.run().await;
        assert!(!report.healthy);
        assert!(report.check_ok);
        assert_eq!(report.mode, BackendMode::Degraded);
        assert_eq!(job.last.load(Ordering::Relaxed), UNHEALTHY);

        node.shutdown().await;
    }
}
