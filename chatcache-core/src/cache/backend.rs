//! Cache backend adapter
//!
//! Routes every operation to the Redis node owning the key, or to the
//! in-process [`MemoryStore`] when no cluster is configured or after the
//! cluster became unreachable.
//!
//! State machine:
//! - `Clustered`: operations go to the routed write node.
//! - `Degraded`: entered one-way on the first connection-class error while
//!   clustered. The failing operation is re-run against the memory store.
//!   Only an explicit [`CacheBackend::reconnect`] leaves this state.
//! - `Standalone`: no write nodes configured, memory store only.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redis::RedisResult;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::CacheValue;
use super::memory::MemoryStore;
use super::redis_node::{is_connection_error, RedisNode};
use super::shard_router::ShardRouter;
use crate::config::CacheConfig;
use crate::metrics;
use crate::{Error, Result};

/// Observable adapter mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    Clustered,
    Degraded,
    Standalone,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clustered => write!(f, "clustered"),
            Self::Degraded => write!(f, "degraded"),
            Self::Standalone => write!(f, "standalone"),
        }
    }
}

#[derive(Debug, Default)]
struct ClusterTopology {
    write_nodes: Vec<RedisNode>,
    read_nodes: Vec<RedisNode>,
}

impl ClusterTopology {
    async fn connect(config: &CacheConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.connect_timeout_seconds);
        let password = config.password.as_deref();

        let mut write_nodes = Vec::with_capacity(config.write_nodes.len());
        for url in &config.write_nodes {
            write_nodes.push(RedisNode::connect(url, password, timeout).await?);
        }
        let mut read_nodes = Vec::with_capacity(config.read_nodes.len());
        for url in &config.read_nodes {
            read_nodes.push(RedisNode::connect(url, password, timeout).await?);
        }

        Ok(Self {
            write_nodes,
            read_nodes,
        })
    }

    fn all_nodes(&self) -> impl Iterator<Item = &RedisNode> {
        self.write_nodes.iter().chain(self.read_nodes.iter())
    }
}

#[derive(Debug)]
enum BackendState {
    Clustered(Arc<ClusterTopology>),
    /// `demoted` distinguishes Degraded from Standalone
    Fallback { demoted: bool },
}

/// Sharded cache with in-memory fallback
pub struct CacheBackend {
    router: Arc<ShardRouter>,
    state: RwLock<BackendState>,
    memory: MemoryStore,
    config: CacheConfig,
    reaper_cancel: CancellationToken,
}

impl CacheBackend {
    /// Connect to the configured nodes
    ///
    /// With no write nodes the adapter runs standalone on the memory store.
    /// If the nodes cannot be reached the adapter starts degraded.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let router = Arc::new(ShardRouter::new(
            config.effective_shard_count(),
            config.read_nodes.len(),
        ));

        let state = if config.write_nodes.is_empty() {
            info!(
                shard_count = router.shard_count(),
                "No cache nodes configured, using in-memory store"
            );
            BackendState::Fallback { demoted: false }
        } else {
            match ClusterTopology::connect(config).await {
                Ok(topology) => {
                    info!(
                        write_nodes = topology.write_nodes.len(),
                        read_nodes = topology.read_nodes.len(),
                        "Connected to cache cluster"
                    );
                    metrics::backend::BACKEND_DEGRADED.set(0);
                    BackendState::Clustered(Arc::new(topology))
                }
                Err(e) => {
                    error!(error = %e, "Cache cluster unreachable at startup, running degraded");
                    metrics::backend::BACKEND_DEGRADED.set(1);
                    BackendState::Fallback { demoted: true }
                }
            }
        };

        let memory = MemoryStore::new();
        let reaper_cancel = CancellationToken::new();
        memory.spawn_reaper(
            Duration::from_secs(config.reaper_interval_seconds.max(1)),
            reaper_cancel.clone(),
        );

        Ok(Self {
            router,
            state: RwLock::new(state),
            memory,
            config: config.clone(),
            reaper_cancel,
        })
    }

    /// Standalone adapter over a fresh memory store, without a reaper task.
    /// Expired entries are still dropped on access.
    #[must_use]
    pub fn in_memory() -> Self {
        let config = CacheConfig::default();
        Self {
            router: Arc::new(ShardRouter::new(config.effective_shard_count(), 0)),
            state: RwLock::new(BackendState::Fallback { demoted: false }),
            memory: MemoryStore::new(),
            config,
            reaper_cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    #[must_use]
    pub fn mode(&self) -> BackendMode {
        match &*self.state.read() {
            BackendState::Clustered(_) => BackendMode::Clustered,
            BackendState::Fallback { demoted: true } => BackendMode::Degraded,
            BackendState::Fallback { demoted: false } => BackendMode::Standalone,
        }
    }

    /// Write shard of a room
    #[must_use]
    pub fn shard_for(&self, room_id: &str) -> usize {
        self.router.shard_for(room_id)
    }

    /// Entries held by the memory store
    #[must_use]
    pub fn memory_entries(&self) -> usize {
        self.memory.len()
    }

    fn topology(&self) -> Option<Arc<ClusterTopology>> {
        match &*self.state.read() {
            BackendState::Clustered(topology) => Some(topology.clone()),
            BackendState::Fallback { .. } => None,
        }
    }

    fn primary(&self, key: &str) -> Option<RedisNode> {
        let topology = self.topology()?;
        topology.write_nodes.get(self.router.route_key(key)).cloned()
    }

    /// Switch to the memory store; no-op unless currently clustered
    pub fn force_demote(&self, reason: &str) {
        let mut state = self.state.write();
        if matches!(*state, BackendState::Clustered(_)) {
            *state = BackendState::Fallback { demoted: true };
            metrics::backend::BACKEND_DEGRADED.set(1);
            error!(reason, "Cache cluster unreachable, demoted to in-memory fallback");
        }
    }

    /// Operator-triggered return to clustered mode
    ///
    /// Reconnects every configured node and swaps the topology in. Entries
    /// written to the memory store while degraded are not migrated.
    pub async fn reconnect(&self) -> Result<BackendMode> {
        if self.config.write_nodes.is_empty() {
            return Err(Error::Configuration(
                "No cache nodes configured, nothing to reconnect to".to_string(),
            ));
        }
        let topology = ClusterTopology::connect(&self.config).await?;
        *self.state.write() = BackendState::Clustered(Arc::new(topology));
        metrics::backend::BACKEND_DEGRADED.set(0);
        info!("Reconnected to cache cluster");
        Ok(BackendMode::Clustered)
    }

    /// Demote on connection-class errors, surface anything else
    fn handle_error(&self, op: &'static str, err: redis::RedisError) -> Result<()> {
        if is_connection_error(&err) {
            self.force_demote(&format!("{op}: {err}"));
            Ok(())
        } else {
            Err(Error::Cache(format!("{op} failed: {err}")))
        }
    }

    /// Run `f` on the key's write node; `None` means use the memory store
    async fn on_primary<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(RedisNode) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let Some(node) = self.primary(key) else {
            return Ok(None);
        };
        match f(node).await {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.handle_error(op, err)?;
                Ok(None)
            }
        }
    }

    // ==================== Typed values ====================

    /// Read and decode a value. Corrupted entries are deleted and read as a miss.
    pub async fn get(&self, key: &str) -> Result<Option<CacheValue>> {
        let Some(raw) = self.get_raw(key).await? else {
            return Ok(None);
        };
        Ok(self.decode_or_evict(key, &raw, "read").await)
    }

    /// Read from the next read replica, falling back to the write node.
    ///
    /// Replica failures never demote the adapter.
    pub async fn get_from_replica(&self, key: &str) -> Result<Option<CacheValue>> {
        let replica = self.topology().and_then(|topology| {
            self.router
                .next_read_target()
                .and_then(|index| topology.read_nodes.get(index).cloned())
        });

        if let Some(node) = replica {
            match node.get(key).await {
                Ok(Some(raw)) => {
                    if let Ok(value) = CacheValue::decode(&raw) {
                        return Ok(Some(value));
                    }
                    // Corrupt on the replica; the write node decides
                }
                Ok(None) => return Ok(None),
                Err(e) => {
                    warn!(key = %key, replica = node.url(), error = %e, "Replica read failed, using primary");
                }
            }
        }
        self.get(key).await
    }

    pub async fn set(&self, key: &str, value: &CacheValue, ttl_seconds: u64) -> Result<()> {
        let raw = value.encode()?;
        self.set_raw(key, &raw, ttl_seconds).await
    }

    async fn decode_or_evict(&self, key: &str, raw: &str, source: &str) -> Option<CacheValue> {
        match CacheValue::decode(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Deleting corrupted cache entry");
                metrics::cache::CORRUPTED_ENTRIES
                    .with_label_values(&[source])
                    .inc();
                if let Err(e) = self.delete(&[key.to_string()]).await {
                    warn!(key = %key, error = %e, "Failed to delete corrupted cache entry");
                }
                None
            }
        }
    }

    // ==================== Raw strings ====================

    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        if let Some(value) = self
            .on_primary("get", key, |node| async move { node.get(key).await })
            .await?
        {
            return Ok(value);
        }
        self.memory.get(key)
    }

    pub async fn set_raw(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        if self
            .on_primary("set", key, |node| async move {
                node.set(key, value, ttl_seconds).await
            })
            .await?
            .is_some()
        {
            return Ok(());
        }
        self.memory.set(key, value, ttl_seconds);
        Ok(())
    }

    /// Write several values with one pipelined round trip per shard
    pub async fn set_many(&self, entries: &[(String, CacheValue, u64)]) -> Result<()> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value, ttl_seconds) in entries {
            encoded.push((key.clone(), value.encode()?, *ttl_seconds));
        }

        if let Some(topology) = self.topology() {
            let mut by_shard: HashMap<usize, Vec<(String, String, u64)>> = HashMap::new();
            for entry in &encoded {
                by_shard
                    .entry(self.router.route_key(&entry.0))
                    .or_default()
                    .push(entry.clone());
            }

            let mut demoted = false;
            for (shard, batch) in by_shard {
                let Some(node) = topology.write_nodes.get(shard) else {
                    continue;
                };
                if let Err(err) = node.set_many(&batch).await {
                    self.handle_error("set_many", err)?;
                    demoted = true;
                    break;
                }
            }
            if !demoted {
                return Ok(());
            }
        }

        for (key, raw, ttl_seconds) in &encoded {
            self.memory.set(key, raw, *ttl_seconds);
        }
        Ok(())
    }

    /// Delete keys from their write nodes, returning how many existed
    pub async fn delete(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        if let Some(topology) = self.topology() {
            let mut by_shard: HashMap<usize, Vec<String>> = HashMap::new();
            for key in keys {
                by_shard
                    .entry(self.router.route_key(key))
                    .or_default()
                    .push(key.clone());
            }

            let mut deleted = 0;
            let mut demoted = false;
            for (shard, batch) in by_shard {
                let Some(node) = topology.write_nodes.get(shard) else {
                    continue;
                };
                match node.delete(&batch).await {
                    Ok(count) => deleted += count,
                    Err(err) => {
                        self.handle_error("delete", err)?;
                        demoted = true;
                        break;
                    }
                }
            }
            if !demoted {
                return Ok(deleted);
            }
        }

        Ok(self.memory.delete(keys))
    }

    /// Keys matching a glob across every node, sorted and deduplicated
    pub async fn keys_by_pattern(&self, pattern: &str) -> Result<Vec<String>> {
        if let Some(topology) = self.topology() {
            let mut found = BTreeSet::new();
            let mut demoted = false;
            for node in &topology.write_nodes {
                match node.scan(pattern).await {
                    Ok(keys) => found.extend(keys),
                    Err(err) => {
                        self.handle_error("scan", err)?;
                        demoted = true;
                        break;
                    }
                }
            }
            if !demoted {
                for node in &topology.read_nodes {
                    match node.scan(pattern).await {
                        Ok(keys) => found.extend(keys),
                        Err(e) => warn!(replica = node.url(), error = %e, "Replica scan failed"),
                    }
                }
                return Ok(found.into_iter().collect());
            }
        }

        let mut keys = self.memory.keys(pattern)?;
        keys.sort();
        Ok(keys)
    }

    /// Delete every key matching a glob on every node
    ///
    /// Scans the whole keyspace of each node; meant for maintenance, not for
    /// request paths. Returns the number of distinct keys matched.
    pub async fn delete_by_pattern(&self, pattern: &str) -> Result<u64> {
        let keys = self.keys_by_pattern(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }

        if let Some(topology) = self.topology() {
            for (index, node) in topology.all_nodes().enumerate() {
                if let Err(err) = node.delete(&keys).await {
                    if index < topology.write_nodes.len() {
                        self.handle_error("delete_by_pattern", err)?;
                        self.memory.delete(&keys);
                        break;
                    }
                    warn!(replica = node.url(), error = %err, "Replica pattern delete failed");
                }
            }
        } else {
            self.memory.delete(&keys);
        }

        info!(pattern, count = keys.len(), "Deleted keys by pattern");
        Ok(keys.len() as u64)
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        if let Some(applied) = self
            .on_primary("expire", key, |node| async move {
                node.expire(key, ttl_seconds).await
            })
            .await?
        {
            return Ok(applied);
        }
        Ok(self.memory.expire(key, ttl_seconds))
    }

    // ==================== Sets ====================

    pub async fn add_to_set(&self, key: &str, member: &str) -> Result<bool> {
        if let Some(added) = self
            .on_primary("sadd", key, |node| async move {
                node.add_to_set(key, member).await
            })
            .await?
        {
            return Ok(added);
        }
        self.memory.add_to_set(key, member)
    }

    pub async fn remove_from_set(&self, key: &str, member: &str) -> Result<bool> {
        if let Some(removed) = self
            .on_primary("srem", key, |node| async move {
                node.remove_from_set(key, member).await
            })
            .await?
        {
            return Ok(removed);
        }
        self.memory.remove_from_set(key, member)
    }

    /// Set members, sorted
    pub async fn members(&self, key: &str) -> Result<Vec<String>> {
        if let Some(members) = self
            .on_primary("smembers", key, |node| async move { node.members(key).await })
            .await?
        {
            return Ok(members);
        }
        self.memory.members(key)
    }

    pub async fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        if let Some(found) = self
            .on_primary("sismember", key, |node| async move {
                node.is_member(key, member).await
            })
            .await?
        {
            return Ok(found);
        }
        self.memory.is_member(key, member)
    }

    // ==================== Hashes ====================

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        if self
            .on_primary("hset", key, |node| async move {
                node.hash_set(key, field, value).await
            })
            .await?
            .is_some()
        {
            return Ok(());
        }
        self.memory.hash_set(key, field, value)
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        if let Some(value) = self
            .on_primary("hget", key, |node| async move {
                node.hash_get(key, field).await
            })
            .await?
        {
            return Ok(value);
        }
        self.memory.hash_get(key, field)
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        if let Some(removed) = self
            .on_primary("hdel", key, |node| async move {
                node.hash_delete(key, field).await
            })
            .await?
        {
            return Ok(removed);
        }
        self.memory.hash_delete(key, field)
    }

    pub async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        if let Some(value) = self
            .on_primary("hincrby", key, |node| async move {
                node.hash_increment(key, field, delta).await
            })
            .await?
        {
            return Ok(value);
        }
        self.memory.hash_increment(key, field, delta)
    }

    pub async fn hash_values(&self, key: &str) -> Result<Vec<String>> {
        if let Some(values) = self
            .on_primary("hvals", key, |node| async move {
                node.hash_values(key).await
            })
            .await?
        {
            return Ok(values);
        }
        self.memory.hash_values(key)
    }

    // ==================== Replicas ====================

    /// Fire-and-forget copy of a write to every read replica
    pub fn replicate_set(&self, key: &str, raw: &str, ttl_seconds: u64) {
        let Some(topology) = self.topology() else {
            return;
        };
        for node in topology.read_nodes.iter().cloned() {
            let key = key.to_string();
            let raw = raw.to_string();
            tokio::spawn(async move {
                if let Err(e) = node.set(&key, &raw, ttl_seconds).await {
                    warn!(key = %key, replica = node.url(), error = %e, "Replica write failed");
                    metrics::cache::REPLICA_WRITE_FAILURES
                        .with_label_values(&["set"])
                        .inc();
                }
            });
        }
    }

    /// Fire-and-forget delete on every read replica
    pub fn replicate_delete(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let Some(topology) = self.topology() else {
            return;
        };
        for node in topology.read_nodes.iter().cloned() {
            let keys = keys.to_vec();
            tokio::spawn(async move {
                if let Err(e) = node.delete(&keys).await {
                    warn!(replica = node.url(), error = %e, "Replica delete failed");
                    metrics::cache::REPLICA_WRITE_FAILURES
                        .with_label_values(&["delete"])
                        .inc();
                }
            });
        }
    }

    // ==================== Maintenance ====================

    /// Ping every node; does not change the adapter state
    pub async fn ping(&self) -> Result<()> {
        let Some(topology) = self.topology() else {
            return Ok(());
        };
        for node in topology.all_nodes() {
            node.ping()
                .await
                .map_err(|e| Error::Cache(format!("PING {} failed: {e}", node.url())))?;
        }
        Ok(())
    }

    /// Remove every entry from every node and from the memory store
    pub async fn flush_all(&self) -> Result<()> {
        if let Some(topology) = self.topology() {
            for node in topology.all_nodes() {
                if let Err(err) = node.flush().await {
                    self.handle_error("flushdb", err)?;
                    break;
                }
                debug!(node = node.url(), "Flushed cache node");
            }
        }
        self.memory.flush();
        Ok(())
    }
}

impl Drop for CacheBackend {
    fn drop(&mut self) {
        self.reaper_cancel.cancel();
    }
}

impl std::fmt::Debug for CacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBackend")
            .field("mode", &self.mode())
            .field("shard_count", &self.router.shard_count())
            .finish_non_exhaustive()
    }
}
