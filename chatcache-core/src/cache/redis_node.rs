//! One Redis node of the cache topology
//!
//! Wraps a multiplexed async connection. Connection-class failures are
//! returned to the caller unchanged so the adapter can decide to demote.

use std::time::Duration;

use redis::{aio::MultiplexedConnection, AsyncCommands, Client, RedisResult};

use crate::{Error, Result};

/// SCAN page size used by key enumeration
const SCAN_COUNT: usize = 500;

/// Connected Redis node
#[derive(Clone)]
pub struct RedisNode {
    url: String,
    conn: MultiplexedConnection,
}

impl RedisNode {
    /// Open a connection to `url`, applying `password` when the URL carries none
    pub async fn connect(url: &str, password: Option<&str>, timeout: Duration) -> Result<Self> {
        let effective_url = with_password(url, password)?;
        let client = Client::open(effective_url.as_str())
            .map_err(|e| Error::Configuration(format!("Invalid cache node URL {url}: {e}")))?;

        let conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Cache(format!("Timed out connecting to cache node {url}")))??;

        Ok(Self {
            url: redact_url(url),
            conn,
        })
    }

    /// Node address with credentials removed, for logs
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    pub async fn get(&self, key: &str) -> RedisResult<Option<String>> {
        self.conn().get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> RedisResult<()> {
        let mut conn = self.conn();
        if ttl_seconds > 0 {
            conn.set_ex(key, value, ttl_seconds).await
        } else {
            conn.set(key, value).await
        }
    }

    /// Pipeline several writes in one round trip
    pub async fn set_many(&self, entries: &[(String, String, u64)]) -> RedisResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value, ttl_seconds) in entries {
            if *ttl_seconds > 0 {
                pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(*ttl_seconds).ignore();
            } else {
                pipe.cmd("SET").arg(key).arg(value).ignore();
            }
        }
        let mut conn = self.conn();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    pub async fn delete(&self, keys: &[String]) -> RedisResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn().del(keys).await
    }

    /// Enumerate keys matching `pattern` with a SCAN cursor loop
    pub async fn scan(&self, pattern: &str) -> RedisResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let seconds = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        self.conn().expire(key, seconds).await
    }

    pub async fn add_to_set(&self, key: &str, member: &str) -> RedisResult<bool> {
        let added: u64 = self.conn().sadd(key, member).await?;
        Ok(added > 0)
    }

    pub async fn remove_from_set(&self, key: &str, member: &str) -> RedisResult<bool> {
        let removed: u64 = self.conn().srem(key, member).await?;
        Ok(removed > 0)
    }

    pub async fn members(&self, key: &str) -> RedisResult<Vec<String>> {
        let mut members: Vec<String> = self.conn().smembers(key).await?;
        members.sort();
        Ok(members)
    }

    pub async fn is_member(&self, key: &str, member: &str) -> RedisResult<bool> {
        self.conn().sismember(key, member).await
    }

    pub async fn hash_set(&self, key: &str, field: &str, value: &str) -> RedisResult<()> {
        let _: u64 = self.conn().hset(key, field, value).await?;
        Ok(())
    }

    pub async fn hash_get(&self, key: &str, field: &str) -> RedisResult<Option<String>> {
        self.conn().hget(key, field).await
    }

    pub async fn hash_delete(&self, key: &str, field: &str) -> RedisResult<bool> {
        let removed: u64 = self.conn().hdel(key, field).await?;
        Ok(removed > 0)
    }

    pub async fn hash_increment(&self, key: &str, field: &str, delta: i64) -> RedisResult<i64> {
        self.conn().hincr(key, field, delta).await
    }

    pub async fn hash_values(&self, key: &str) -> RedisResult<Vec<String>> {
        self.conn().hvals(key).await
    }

    pub async fn ping(&self) -> RedisResult<String> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async(&mut conn).await
    }

    pub async fn flush(&self) -> RedisResult<()> {
        let mut conn = self.conn();
        redis::cmd("FLUSHDB").query_async(&mut conn).await
    }
}

impl std::fmt::Debug for RedisNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisNode").field("url", &self.url).finish()
    }
}

/// Whether a Redis error means the node is unreachable
#[must_use]
pub fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
}

fn with_password(url: &str, password: Option<&str>) -> Result<String> {
    let Some(password) = password else {
        return Ok(url.to_string());
    };
    let mut parsed = url::Url::parse(url)
        .map_err(|e| Error::Configuration(format!("Invalid cache node URL {url}: {e}")))?;
    if parsed.password().is_none() {
        parsed
            .set_password(Some(password))
            .map_err(|()| Error::Configuration(format!("Cannot set password on {url}")))?;
    }
    Ok(parsed.to_string())
}

/// `url` with its password masked
#[must_use]
pub fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}
