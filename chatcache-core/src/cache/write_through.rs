//! Write-through coordinator
//!
//! Writes land on the routed write node synchronously; read replicas are
//! updated by detached tasks that are never joined.

use std::sync::Arc;

use tracing::debug;

use super::backend::CacheBackend;
use super::codec::CacheValue;
use crate::config::{DataClass, TtlConfig};
use crate::metrics;
use crate::Result;

#[derive(Debug, Clone)]
pub struct WriteThrough {
    backend: Arc<CacheBackend>,
    ttl: TtlConfig,
}

impl WriteThrough {
    #[must_use]
    pub const fn new(backend: Arc<CacheBackend>, ttl: TtlConfig) -> Self {
        Self { backend, ttl }
    }

    #[must_use]
    pub fn backend(&self) -> &CacheBackend {
        &self.backend
    }

    #[must_use]
    pub const fn ttl(&self) -> &TtlConfig {
        &self.ttl
    }

    /// Write the primary, then fan out to replicas in the background
    pub async fn write_through(&self, key: &str, value: &CacheValue, ttl_seconds: u64) -> Result<()> {
        let raw = value.encode()?;
        self.backend.set_raw(key, &raw, ttl_seconds).await?;
        self.backend.replicate_set(key, &raw, ttl_seconds);
        debug!(key = %key, kind = value.kind(), ttl_seconds, "Cache write-through");
        Ok(())
    }

    /// Write with the TTL of a data class
    pub async fn write_class(&self, key: &str, value: &CacheValue, class: DataClass) -> Result<()> {
        self.write_through(key, value, self.ttl.seconds(class)).await
    }

    /// Pipeline all writes per shard, then fan out to replicas
    pub async fn write_through_batch(&self, entries: Vec<(String, CacheValue, u64)>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.backend.set_many(&entries).await?;
        for (key, value, ttl_seconds) in &entries {
            self.backend.replicate_set(key, &value.encode()?, *ttl_seconds);
        }
        debug!(count = entries.len(), "Cache batch write-through");
        Ok(())
    }

    /// Delete from the primary and, fire-and-forget, from every replica
    pub async fn invalidate(&self, keys: &[String], cache_type: &str) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.backend.delete(keys).await?;
        self.backend.replicate_delete(keys);
        metrics::cache::CACHE_EVICTIONS
            .with_label_values(&[cache_type])
            .inc_by(keys.len() as f64);
        Ok(deleted)
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        self.backend.get(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::test_helpers::StubRedis;

    fn coordinator() -> WriteThrough {
        WriteThrough::new(Arc::new(CacheBackend::in_memory()), TtlConfig::default())
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let cache = coordinator();
        cache
            .write_through("msg_count:r1", &CacheValue::Count(7), 60)
            .await
            .unwrap();
        assert_eq!(
            cache.get("msg_count:r1").await.unwrap().and_then(|v| v.as_count()),
            Some(7)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_class_uses_class_ttl() {
        let cache = coordinator();
        cache
            .write_class("socket:health_check:n1", &CacheValue::Text("ok".into()), DataClass::HealthProbe)
            .await
            .unwrap();

        tokio::time::advance(std::time::Duration::from_secs(9)).await;
        assert!(cache.get("socket:health_check:n1").await.unwrap().is_some());
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert!(cache.get("socket:health_check:n1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_and_invalidate() {
        let cache = coordinator();
        let entries = vec![
            ("msg_count:r1".to_string(), CacheValue::Count(1), 60),
            ("msg_count:r2".to_string(), CacheValue::Count(2), 60),
        ];
        cache.write_through_batch(entries).await.unwrap();
        assert!(cache.get("msg_count:r2").await.unwrap().is_some());

        let keys = vec!["msg_count:r1".to_string(), "msg_count:r2".to_string()];
        assert_eq!(cache.invalidate(&keys, "message_count").await.unwrap(), 2);
        assert!(cache.get("msg_count:r1").await.unwrap().is_none());
        assert_eq!(cache.invalidate(&[], "message_count").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_replica_is_counted_without_failing_write() {
        let primary = StubRedis::start().await;
        let replica = StubRedis::start().await;
        let config = CacheConfig {
            write_nodes: vec![primary.url()],
            read_nodes: vec![replica.url()],
            ..CacheConfig::default()
        };
        let backend = Arc::new(CacheBackend::connect(&config).await.unwrap());
        let cache = WriteThrough::new(backend.clone(), TtlConfig::default());
        replica.shutdown().await;

        let failures = || {
            metrics::cache::REPLICA_WRITE_FAILURES
                .with_label_values(&["set"])
                .get()
        };
        let before = failures();

        cache
            .write_through("recent:r1", &CacheValue::Text("hi".into()), 60)
            .await
            .unwrap();
        assert_eq!(backend.mode(), crate::cache::BackendMode::Clustered);

        let mut waited = 0;
        while failures() <= before && waited < 100 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            waited += 1;
        }
        assert!(failures() > before);
        assert_eq!(
            cache.get("recent:r1").await.unwrap().and_then(CacheValue::into_text),
            Some("hi".to_string())
        );
        assert_eq!(backend.mode(), crate::cache::BackendMode::Clustered);
        assert_eq!(backend.memory_entries(), 0);

        primary.shutdown().await;
    }
}
