//! Configuration loading and component wiring

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chatcache_cluster::{ConnectionStateStore, HealthJob, Scrubber};
use chatcache_core::cache::redis_node::redact_url;
use chatcache_core::cache::{CacheBackend, WriteThrough};
use chatcache_core::Config;

/// Load configuration from a config file or environment variables
///
/// Config file search order:
/// 1. `CHATCACHE_CONFIG_PATH` environment variable (explicit path)
/// 2. ./config.yaml (current working directory)
/// 3. Fall back to environment variables only
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("CHATCACHE_CONFIG_PATH")
        .ok()
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            let cwd = "config.yaml";
            Path::new(cwd).exists().then(|| cwd.to_string())
        });

    let config = match config_path {
        Some(path) => {
            eprintln!("Loading config from {path}");
            Config::from_file(&path)?
        }
        None => Config::from_env()?,
    };

    if let Err(errors) = config.validate() {
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }
    Ok(config)
}

/// Shard index followed by its node URL, password masked
pub fn describe_shard(config: &Config, shard: usize) -> String {
    match config.cache.write_nodes.get(shard) {
        Some(node) => format!("{shard} {}", redact_url(node)),
        None => shard.to_string(),
    }
}

/// Everything the commands operate on
pub struct Components {
    pub backend: Arc<CacheBackend>,
    pub state: ConnectionStateStore,
}

impl Components {
    pub async fn connect(config: &Config) -> Result<Self> {
        let backend = Arc::new(CacheBackend::connect(&config.cache).await?);
        let state = ConnectionStateStore::new(WriteThrough::new(backend.clone(), config.ttl.clone()));
        Ok(Self { backend, state })
    }

    pub fn health_job(&self) -> HealthJob {
        HealthJob::new(self.state.clone(), self.backend.clone())
    }

    pub fn scrubber(&self, config: &Config) -> Scrubber {
        Scrubber::new(self.backend.clone(), config.maintenance.scrub_max_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_components_without_nodes() {
        let config = Config::default();
        let components = Components::connect(&config).await.unwrap();
        let report = components.health_job().run().await;
        assert!(report.healthy && report.check_ok);
        let report = components.scrubber(&config).run().await.unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[test]
    fn test_describe_shard_masks_password() {
        let mut config = Config::default();
        config.cache.write_nodes = vec![
            "redis://cache-0:6379".to_string(),
            "redis://:secret@cache-1:6379".to_string(),
        ];
        assert_eq!(describe_shard(&config, 0), "0 redis://cache-0:6379");
        assert_eq!(describe_shard(&config, 1), "1 redis://:***@cache-1:6379");
        assert_eq!(describe_shard(&config, 2), "2");
    }
}
