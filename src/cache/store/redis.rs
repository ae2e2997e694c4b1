//! Redis-backed durable store shared between instances.
//!
//! Every key lives under a namespace prefix and expires after a generous TTL
//! so abandoned resources do not accumulate.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{DurableStore, StoreError, StoreResult};

/// Key prefix for cache data in Redis.
const KEY_PREFIX: &str = "biolink:cache:";
/// TTL for stored values (auto-cleanup of abandoned resources).
const VALUE_TTL_SECS: u64 = 7 * 86400; // 7 days

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn new(redis_url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Redis connection error: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StoreError::Unavailable(format!("Redis connection manager error: {}", e))
        })?;

        Ok(Self { conn })
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }
}

/// Escape glob metacharacters for a KEYS pattern.
fn escape_glob(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(Self::namespaced(key))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::namespaced(key), value, VALUE_TTL_SECS)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::namespaced(key))
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}{}*", escape_glob(KEY_PREFIX), escape_glob(prefix));
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut keys: Vec<String> = keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(KEY_PREFIX).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("profile:bob"), "profile:bob");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }
}
