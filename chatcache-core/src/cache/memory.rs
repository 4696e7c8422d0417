//! In-process fallback store
//!
//! Mirrors the subset of Redis semantics the adapter relies on: string,
//! set and hash values, per-key TTL, glob key enumeration. Expired entries
//! are dropped lazily on access and periodically by a reaper task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Error, Result};

#[derive(Debug, Clone)]
enum MemoryData {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
}

impl MemoryData {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Set(_) => "set",
            Self::Hash(_) => "hash",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) => false,
            Self::Set(set) => set.is_empty(),
            Self::Hash(hash) => hash.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: MemoryData,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str, expected: &str, found: &MemoryData) -> Error {
    Error::Cache(format!(
        "WRONGTYPE key {key} holds a {} value, expected {expected}",
        found.type_name()
    ))
}

fn deadline(ttl_seconds: u64) -> Option<Instant> {
    (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds))
}

/// Process-local key/value store with TTL
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on a live entry, dropping it first if it has expired
    fn read_live<R>(&self, key: &str, f: impl FnOnce(&MemoryEntry) -> R) -> Option<R> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return None,
            Some(entry) if !entry.is_expired(now) => return Some(f(entry.value())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Mutate an entry, creating it with `init` if absent or expired.
    /// Empty collections left behind are removed, as Redis does.
    fn write_live<R>(
        &self,
        key: &str,
        init: impl Fn() -> MemoryData,
        f: impl FnOnce(&mut MemoryEntry) -> Result<R>,
    ) -> Result<R> {
        let now = Instant::now();
        let result = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| MemoryEntry {
                    data: init(),
                    expires_at: None,
                });
            if entry.is_expired(now) {
                *entry = MemoryEntry {
                    data: init(),
                    expires_at: None,
                };
            }
            f(entry.value_mut())
        };
        self.entries
            .remove_if(key, |_, entry| entry.data.is_empty_collection());
        result
    }

    // ==================== Strings ====================

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.read_live(key, |entry| match &entry.data {
            MemoryData::Str(value) => Ok(value.clone()),
            other => Err(wrong_type(key, "string", other)),
        })
        .transpose()
    }

    /// Set a string value; `ttl_seconds == 0` means no expiry
    pub fn set(&self, key: &str, value: &str, ttl_seconds: u64) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                data: MemoryData::Str(value.to_string()),
                expires_at: deadline(ttl_seconds),
            },
        );
    }

    /// Delete keys, returning how many live keys were removed
    pub fn delete(&self, keys: &[String]) -> u64 {
        let now = Instant::now();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count() as u64
    }

    /// Live keys matching a Redis-style glob pattern
    pub fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    /// Reset the TTL of an existing key
    pub fn expire(&self, key: &str, ttl_seconds: u64) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = deadline(ttl_seconds);
                true
            }
            _ => false,
        }
    }

    // ==================== Sets ====================

    pub fn add_to_set(&self, key: &str, member: &str) -> Result<bool> {
        self.write_live(
            key,
            || MemoryData::Set(HashSet::new()),
            |entry| match &mut entry.data {
                MemoryData::Set(set) => Ok(set.insert(member.to_string())),
                other => Err(wrong_type(key, "set", other)),
            },
        )
    }

    pub fn remove_from_set(&self, key: &str, member: &str) -> Result<bool> {
        if self.read_live(key, |_| ()).is_none() {
            return Ok(false);
        }
        self.write_live(
            key,
            || MemoryData::Set(HashSet::new()),
            |entry| match &mut entry.data {
                MemoryData::Set(set) => Ok(set.remove(member)),
                other => Err(wrong_type(key, "set", other)),
            },
        )
    }

    pub fn members(&self, key: &str) -> Result<Vec<String>> {
        self.read_live(key, |entry| match &entry.data {
            MemoryData::Set(set) => {
                let mut members: Vec<String> = set.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            other => Err(wrong_type(key, "set", other)),
        })
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    pub fn is_member(&self, key: &str, member: &str) -> Result<bool> {
        self.read_live(key, |entry| match &entry.data {
            MemoryData::Set(set) => Ok(set.contains(member)),
            other => Err(wrong_type(key, "set", other)),
        })
        .unwrap_or(Ok(false))
    }

    // ==================== Hashes ====================

    pub fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.write_live(
            key,
            || MemoryData::Hash(HashMap::new()),
            |entry| match &mut entry.data {
                MemoryData::Hash(hash) => {
                    hash.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    pub fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read_live(key, |entry| match &entry.data {
            MemoryData::Hash(hash) => Ok(hash.get(field).cloned()),
            other => Err(wrong_type(key, "hash", other)),
        })
        .unwrap_or(Ok(None))
    }

    pub fn hash_delete(&self, key: &str, field: &str) -> Result<bool> {
        if self.read_live(key, |_| ()).is_none() {
            return Ok(false);
        }
        self.write_live(
            key,
            || MemoryData::Hash(HashMap::new()),
            |entry| match &mut entry.data {
                MemoryData::Hash(hash) => Ok(hash.remove(field).is_some()),
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    pub fn hash_increment(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.write_live(
            key,
            || MemoryData::Hash(HashMap::new()),
            |entry| match &mut entry.data {
                MemoryData::Hash(hash) => {
                    let current = match hash.get(field) {
                        Some(raw) => raw.parse::<i64>().map_err(|_| {
                            Error::Cache(format!("hash value at {key}.{field} is not an integer"))
                        })?,
                        None => 0,
                    };
                    let next = current + delta;
                    hash.insert(field.to_string(), next.to_string());
                    Ok(next)
                }
                other => Err(wrong_type(key, "hash", other)),
            },
        )
    }

    pub fn hash_values(&self, key: &str) -> Result<Vec<String>> {
        self.read_live(key, |entry| match &entry.data {
            MemoryData::Hash(hash) => Ok(hash.values().cloned().collect()),
            other => Err(wrong_type(key, "hash", other)),
        })
        .unwrap_or_else(|| Ok(Vec::new()))
    }

    // ==================== Maintenance ====================

    /// Number of stored entries, expired ones included until reaped
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(&self) {
        self.entries.clear();
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn the background reaper; it stops when `cancel` fires
    pub fn spawn_reaper(
        &self,
        every: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(every);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("Memory store reaper shutting down");
                        return;
                    }
                    _ = timer.tick() => {
                        let removed = store.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = store.len(), "Reaped expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`, `\` escapes) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push_str(&regex::escape(&next.to_string()));
                }
            }
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'^') {
                    chars.next();
                    class.push('^');
                }
                for inner in chars.by_ref() {
                    match inner {
                        ']' => {
                            closed = true;
                            break;
                        }
                        '\\' | '[' | '&' | '~' => {
                            class.push('\\');
                            class.push(inner);
                        }
                        _ => class.push(inner),
                    }
                }
                if closed && !class.is_empty() && class != "^" {
                    out.push('[');
                    out.push_str(&class);
                    out.push(']');
                } else {
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&class.replace('\\', "")));
                    if closed {
                        out.push_str(&regex::escape("]"));
                    }
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }

    out.push('$');
    Regex::new(&out).map_err(|e| Error::InvalidInput(format!("Invalid key pattern {pattern}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_string_ttl_expiry() {
        let store = MemoryStore::new();
        store.set("k", "v", 60);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").unwrap(), None);
        // Lazy expiry removed the entry
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = MemoryStore::new();
        store.set("k", "v", 0);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        assert!(store.add_to_set("s", "b").unwrap());
        assert!(store.add_to_set("s", "a").unwrap());
        assert!(!store.add_to_set("s", "a").unwrap());

        assert_eq!(store.members("s").unwrap(), vec!["a", "b"]);
        assert!(store.is_member("s", "a").unwrap());

        assert!(store.remove_from_set("s", "a").unwrap());
        assert!(store.remove_from_set("s", "b").unwrap());
        // Empty sets disappear
        assert!(store.is_empty());
        assert!(!store.remove_from_set("s", "b").unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_refreshes_ttl() {
        let store = MemoryStore::new();
        store.add_to_set("s", "a").unwrap();
        assert!(store.expire("s", 10));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.expire("s", 10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(store.is_member("s", "a").unwrap());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!store.is_member("s", "a").unwrap());
        assert!(!store.expire("s", 10));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.hash_increment("h", "attempts", 1).unwrap(), 1);
        assert_eq!(store.hash_increment("h", "attempts", 2).unwrap(), 3);
        store.hash_set("h", "last_error", "timeout").unwrap();

        assert_eq!(store.hash_get("h", "attempts").unwrap().as_deref(), Some("3"));
        let mut values = store.hash_values("h").unwrap();
        values.sort();
        assert_eq!(values, vec!["3", "timeout"]);

        assert!(store.hash_delete("h", "last_error").unwrap());
        assert!(!store.hash_delete("h", "last_error").unwrap());

        store.hash_set("h", "name", "alice").unwrap();
        assert!(store.hash_increment("h", "name", 1).is_err());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::new();
        store.set("k", "v", 0);
        assert!(store.add_to_set("k", "a").is_err());
        assert!(store.members("k").is_err());

        store.add_to_set("s", "a").unwrap();
        assert!(store.get("s").is_err());
    }

    #[tokio::test]
    async fn test_keys_and_delete() {
        let store = MemoryStore::new();
        store.set("messages:r1:0", "a", 0);
        store.set("messages:r1:1", "b", 0);
        store.set("messages:r2:0", "c", 0);
        store.set("recent:r1", "d", 0);

        let mut keys = store.keys("messages:r1:*").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["messages:r1:0", "messages:r1:1"]);

        assert_eq!(store.delete(&keys), 2);
        assert_eq!(store.delete(&keys), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_purges_and_stops() {
        let store = MemoryStore::new();
        store.set("short", "v", 1);
        store.set("long", "v", 3600);

        let cancel = CancellationToken::new();
        let handle = store.spawn_reaper(Duration::from_secs(5), cancel.clone());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.len(), 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_glob_translation() {
        let cases = [
            ("message:*", "message:abc", true),
            ("message:*", "messages:abc", false),
            ("recent:?", "recent:a", true),
            ("recent:?", "recent:ab", false),
            ("msg_count:[ab]", "msg_count:b", true),
            ("msg_count:[^ab]", "msg_count:b", false),
            ("literal.key", "literalXkey", false),
            ("unread:\\*", "unread:*", true),
            ("unread:\\*", "unread:x", false),
            ("open[bracket", "open[bracket", true),
        ];
        for (pattern, key, expected) in cases {
            assert_eq!(
                glob_to_regex(pattern).unwrap().is_match(key),
                expected,
                "{pattern} vs {key}"
            );
        }
    }
}
