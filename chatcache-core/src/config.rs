use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub ttl: TtlConfig,
    pub message_cache: MessageCacheConfig,
    pub maintenance: MaintenanceConfig,
    pub logging: LoggingConfig,
}

/// Cache topology
///
/// An empty `write_nodes` list selects the in-process fallback store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis URLs of the write shards, in shard order
    pub write_nodes: Vec<String>,
    /// Redis URLs of the read replicas
    pub read_nodes: Vec<String>,
    /// Password applied to every node URL that does not carry one
    pub password: Option<String>,
    pub connect_timeout_seconds: u64,
    /// Shard count used when no write nodes are configured
    pub shard_count: usize,
    /// Interval of the in-memory store's expiry reaper
    pub reaper_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            write_nodes: Vec::new(),
            read_nodes: Vec::new(),
            password: None,
            connect_timeout_seconds: 5,
            shard_count: 3,
            reaper_interval_seconds: 30,
        }
    }
}

impl CacheConfig {
    /// Number of write shards the router hashes onto
    #[must_use]
    pub fn effective_shard_count(&self) -> usize {
        if self.write_nodes.is_empty() {
            self.shard_count.max(1)
        } else {
            self.write_nodes.len()
        }
    }
}

/// Data classes with their own expiry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataClass {
    Message,
    MessageBatch,
    RecentMessages,
    MessageCount,
    RoomInfo,
    UserRooms,
    Presence,
    StreamingSession,
    DeliveryQueue,
    HealthProbe,
}

/// TTL per data class, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    pub message: u64,
    pub message_batch: u64,
    pub recent_messages: u64,
    pub message_count: u64,
    pub room_info: u64,
    pub user_rooms: u64,
    pub presence: u64,
    pub streaming_session: u64,
    pub delivery_queue: u64,
    pub health_probe: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            message: 3600,
            message_batch: 1800,
            recent_messages: 600,
            message_count: 7200,
            room_info: 1800,
            user_rooms: 1800,
            presence: 86400,
            streaming_session: 7200,
            delivery_queue: 3600,
            health_probe: 10,
        }
    }
}

impl TtlConfig {
    /// TTL in seconds for a data class
    #[must_use]
    pub const fn seconds(&self, class: DataClass) -> u64 {
        match class {
            DataClass::Message => self.message,
            DataClass::MessageBatch => self.message_batch,
            DataClass::RecentMessages => self.recent_messages,
            DataClass::MessageCount => self.message_count,
            DataClass::RoomInfo => self.room_info,
            DataClass::UserRooms => self.user_rooms,
            DataClass::Presence => self.presence,
            DataClass::StreamingSession => self.streaming_session,
            DataClass::DeliveryQueue => self.delivery_queue,
            DataClass::HealthProbe => self.health_probe,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageCacheConfig {
    /// Maximum length of the recent-messages ring
    pub recent_cap: usize,
    /// Number of leading batch pages evicted on room-wide invalidation.
    ///
    /// Pages past this cap stay cached until their TTL expires. Raising it
    /// widens every invalidation by one delete per page.
    pub max_invalidated_pages: u32,
    pub default_page_size: usize,
}

impl Default for MessageCacheConfig {
    fn default() -> Self {
        Self {
            recent_cap: 50,
            max_invalidated_pages: 10,
            default_page_size: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub health_interval_seconds: u64,
    pub scrub_interval_seconds: u64,
    /// Upper bound on keys inspected per scrub pass
    pub scrub_max_keys: usize,
    /// Try to leave degraded mode after a passing health round trip. Off by default:
    /// flapping between backends thrashes cached data.
    pub auto_reconnect: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_interval_seconds: 30,
            scrub_interval_seconds: 300,
            scrub_max_keys: 500,
            auto_reconnect: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // CHATCACHE_CACHE__WRITE_NODES=redis://a:6379,redis://b:6379
        builder = builder.add_source(
            Environment::with_prefix("CHATCACHE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cache.write_nodes")
                .with_list_parse_key("cache.read_nodes")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check configuration for values the cache layer cannot run with
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for node in self.cache.write_nodes.iter().chain(&self.cache.read_nodes) {
            if url::Url::parse(node).is_err() {
                errors.push(format!("Invalid cache node URL: {node}"));
            }
        }
        if !self.cache.read_nodes.is_empty() && self.cache.write_nodes.is_empty() {
            errors.push("cache.read_nodes requires at least one write node".to_string());
        }
        if self.cache.connect_timeout_seconds == 0 {
            errors.push("cache.connect_timeout_seconds must be greater than 0".to_string());
        }
        if self.message_cache.recent_cap == 0 {
            errors.push("message_cache.recent_cap must be greater than 0".to_string());
        }
        if self.message_cache.default_page_size == 0 {
            errors.push("message_cache.default_page_size must be greater than 0".to_string());
        }
        if self.maintenance.health_interval_seconds == 0
            || self.maintenance.scrub_interval_seconds == 0
        {
            errors.push("maintenance intervals must be greater than 0".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!("Unknown logging format: {}", self.logging.format));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
