//! Prometheus metrics for the cache layer
//!
//! All collectors live in one registry; `gather_text` renders it in the
//! Prometheus text exposition format.

use prometheus::{
    register_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec, Encoder,
    IntGauge, Registry, TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// Cache operations
pub mod cache {
    use super::{register_counter_vec_with_registry, CounterVec, REGISTRY};

    /// Cache hit counter
    pub static CACHE_HITS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_hits_total",
            "Total number of cache hits",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_HITS")
    });

    /// Cache miss counter
    pub static CACHE_MISSES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_misses_total",
            "Total number of cache misses",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_MISSES")
    });

    /// Cache evictions counter
    pub static CACHE_EVICTIONS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "cache_evictions_total",
            "Total number of explicit cache evictions",
            &["cache_type"],
            REGISTRY.clone()
        )
        .expect("Failed to register CACHE_EVICTIONS")
    });

    /// Corrupted entries found and deleted
    pub static CORRUPTED_ENTRIES: std::sync::LazyLock<CounterVec> =
        std::sync::LazyLock::new(|| {
            register_counter_vec_with_registry!(
                "cache_corrupted_entries_total",
                "Total number of corrupted cache entries deleted",
                &["source"],
                REGISTRY.clone()
            )
            .expect("Failed to register CORRUPTED_ENTRIES")
        });

    /// Failed fire-and-forget replica writes
    pub static REPLICA_WRITE_FAILURES: std::sync::LazyLock<CounterVec> =
        std::sync::LazyLock::new(|| {
            register_counter_vec_with_registry!(
                "cache_replica_write_failures_total",
                "Total number of failed replica writes",
                &["operation"],
                REGISTRY.clone()
            )
            .expect("Failed to register REPLICA_WRITE_FAILURES")
        });
}

/// Backend state
pub mod backend {
    use super::{register_int_gauge_with_registry, IntGauge, REGISTRY};

    /// 1 while the adapter runs on the in-memory fallback after a demotion
    pub static BACKEND_DEGRADED: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "cache_backend_degraded",
            "Whether the cache backend has been demoted to the in-memory fallback",
            REGISTRY.clone()
        )
        .expect("Failed to register BACKEND_DEGRADED")
    });

    /// 1 if the last health probe succeeded
    pub static HEALTH_STATUS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "cache_health_status",
            "Result of the last cache health probe (1 = healthy)",
            REGISTRY.clone()
        )
        .expect("Failed to register HEALTH_STATUS")
    });
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_touched_metrics() {
        cache::CACHE_HITS.with_label_values(&["message"]).inc();
        backend::HEALTH_STATUS.set(1);

        let text = gather_text().unwrap();
        assert!(text.contains("cache_hits_total"));
        assert!(text.contains("cache_health_status"));
    }
}
