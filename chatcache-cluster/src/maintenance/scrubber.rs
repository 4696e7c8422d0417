//! Corrupted-entry scrubber
//!
//! Walks the namespaces that hold encoded string values and deletes any
//! value that no longer decodes. Bounded per pass.

use std::sync::Arc;

use chatcache_core::cache::{keys, CacheBackend, CacheValue};
use chatcache_core::metrics::cache::CORRUPTED_ENTRIES;
use tracing::{debug, info, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrubReport {
    pub scanned: usize,
    pub deleted: usize,
    /// The key budget ran out before every namespace was walked
    pub truncated: bool,
}

pub struct Scrubber {
    backend: Arc<CacheBackend>,
    max_keys: usize,
}

impl Scrubber {
    #[must_use]
    pub const fn new(backend: Arc<CacheBackend>, max_keys: usize) -> Self {
        Self { backend, max_keys }
    }

    pub async fn run(&self) -> Result<ScrubReport> {
        let mut report = ScrubReport::default();

        'patterns: for pattern in keys::STRING_VALUE_PATTERNS {
            for key in self.backend.keys_by_pattern(pattern).await? {
                if report.scanned >= self.max_keys {
                    report.truncated = true;
                    break 'patterns;
                }
                report.scanned += 1;

                let raw = match self.backend.get_raw(&key).await {
                    Ok(Some(raw)) => raw,
                    // Expired between scan and read
                    Ok(None) => continue,
                    Err(e) => {
                        debug!(key = %key, error = %e, "Skipping unreadable key");
                        continue;
                    }
                };

                if let Err(e) = CacheValue::decode(&raw) {
                    warn!(key = %key, error = %e, "Scrubbing corrupted cache entry");
                    self.backend.delete(std::slice::from_ref(&key)).await?;
                    CORRUPTED_ENTRIES.with_label_values(&["scrub"]).inc();
                    report.deleted += 1;
                }
            }
        }

        if report.deleted > 0 || report.truncated {
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                truncated = report.truncated,
                "Cache scrub finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scrub_deletes_only_corrupted_values() {
        let backend = Arc::new(CacheBackend::in_memory());
        backend.set("message:m1", &CacheValue::Text("ok".into()), 60).await.unwrap();
        backend.set_raw("message:m2", "[object Object]", 60).await.unwrap();
        backend.set_raw("recent:r1", "{truncated", 60).await.unwrap();
        backend.set_raw("socket:connected_users:u1", "undefined", 60).await.unwrap();
        // Sets are not codec values and must be left alone
        backend.add_to_set("participants:r1", "u1").await.unwrap();
        backend.hash_increment("msg_count:r1", "count", 3).await.unwrap();

        let report = Scrubber::new(backend.clone(), 100).run().await.unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.deleted, 3);
        assert!(!report.truncated);

        assert!(backend.get_raw("message:m1").await.unwrap().is_some());
        assert!(backend.get_raw("message:m2").await.unwrap().is_none());
        assert_eq!(backend.members("participants:r1").await.unwrap(), vec!["u1"]);
        assert_eq!(
            backend.hash_get("msg_count:r1", "count").await.unwrap().as_deref(),
            Some("3")
        );
    }

    #[tokio::test]
    async fn test_scrub_respects_key_budget() {
        let backend = Arc::new(CacheBackend::in_memory());
        for i in 0..5 {
            backend.set_raw(&format!("message:m{i}"), "NaN", 60).await.unwrap();
        }

        let report = Scrubber::new(backend.clone(), 2).run().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.deleted, 2);
        assert!(report.truncated);
        assert_eq!(backend.keys_by_pattern("message:*").await.unwrap().len(), 3);
    }
}
