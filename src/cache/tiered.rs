//! Memory + durable cache with stale-while-revalidate reads.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::key::{belongs_to_resource, resource_prefix, CacheKey};
use super::store::DurableStore;
use super::ttl::TtlCache;

/// Suffix of the durable marker recording when a key was last written.
const TIMESTAMP_SUFFIX: &str = "#ts";

/// Default age after which a durable value is refreshed in the background.
pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(5 * 60);

/// Two-tier cache in front of remote fetches.
///
/// Reads try the in-memory tier, then the durable store. A durable value
/// is fresh while younger than both its TTL and the freshness window, and
/// is copied to memory for whatever is left of that lifetime. An older
/// durable value is returned as-is while one background task refetches
/// it. Misses fetch in the foreground and populate both tiers. Durable
/// store failures are logged and treated as misses.
#[derive(Clone)]
pub struct TieredCache {
    memory: Arc<TtlCache<Value>>,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    freshness: Duration,
    refreshing: Arc<Mutex<HashSet<String>>>,
    refreshes: Arc<Mutex<JoinSet<()>>>,
}

impl TieredCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), DEFAULT_FRESHNESS)
    }

    pub fn with_clock(store: Arc<dyn DurableStore>, clock: Arc<dyn Clock>, freshness: Duration) -> Self {
        Self {
            memory: Arc::new(TtlCache::with_clock(clock.clone())),
            store,
            clock,
            freshness,
            refreshing: Arc::new(Mutex::new(HashSet::new())),
            refreshes: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Fresh in-memory value for `key`, if any.
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.memory.get(&key.render())?;
        serde_json::from_value(value).ok()
    }

    /// Cached value for `key` from either tier, however old. Never fetches.
    pub async fn cached<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        if let Some(value) = self.get(key) {
            return Some(value);
        }
        self.load_durable(&key.render())
            .await
            .map(|(value, _)| value)
    }

    /// Write a value to both tiers.
    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let rendered = key.render();
        let json = to_json(&rendered, value);
        if let Some(json) = json {
            self.write_json(&rendered, json, ttl).await;
        }
    }

    /// Return the cached value for `key`, fetching it on a miss.
    ///
    /// `fetch` runs in the foreground on a miss, in a background task when
    /// only a stale durable value exists, and not at all on a fresh hit.
    /// A durable value goes stale once it is older than `ttl` or the
    /// freshness window, whichever is shorter.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let rendered = key.render();

        if let Some(value) = self.get::<T>(key) {
            debug!("Cache hit for {}", rendered);
            return Ok(value);
        }

        if let Some((value, stored_at_ms)) = self.load_durable::<T>(&rendered).await {
            let age = Duration::from_millis(
                self.clock.now_ms().saturating_sub(stored_at_ms).max(0) as u64,
            );
            let lifetime = ttl.min(self.freshness);
            if age < lifetime {
                debug!("Durable cache hit for {}", rendered);
                if let Ok(json) = serde_json::to_value(&value) {
                    self.memory.set(&rendered, json, lifetime - age);
                }
            } else {
                let age_ms = age.as_millis();
                debug!("Serving stale {} ({} ms old), refreshing", rendered, age_ms);
                self.spawn_refresh(rendered, ttl, fetch);
            }
            return Ok(value);
        }

        debug!("Cache miss for {}", rendered);
        let value = fetch().await?;
        let json = to_json(&rendered, &value);
        if let Some(json) = json {
            self.write_json(&rendered, json, ttl).await;
        }
        Ok(value)
    }

    /// Wait for every background refresh started so far, including any
    /// started while waiting. Short-lived processes call this before exit.
    pub async fn flush(&self) {
        loop {
            let mut pending = std::mem::replace(&mut *self.lock_refreshes(), JoinSet::new());
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    warn!("Background refresh task failed: {}", e);
                }
            }
        }
    }

    /// Remove one key from both tiers.
    pub async fn clear(&self, key: &CacheKey) {
        let rendered = key.render();
        self.memory.remove(&rendered);
        self.remove_durable(&rendered).await;
    }

    /// Remove every key of a logical resource (all qualifiers) from both
    /// tiers. Returns the number of durable keys removed.
    pub async fn clear_resource(&self, kind: &str, id: &str) -> usize {
        let prefix = resource_prefix(kind, id);
        self.memory
            .remove_where(|key| belongs_to_resource(key, &prefix));

        let keys = match self.store.keys_with_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to list cached keys for {}: {}", prefix, e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| belongs_to_resource(k, &prefix)) {
            match self.store.remove(key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to remove cached key {}: {}", key, e),
            }
        }
        debug!("Cleared {} durable keys for {}", removed, prefix);
        removed
    }

    fn spawn_refresh<T, E, F, Fut>(&self, rendered: String, ttl: Duration, fetch: F)
    where
        T: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        {
            let mut refreshing = self
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !refreshing.insert(rendered.clone()) {
                debug!("Refresh already running for {}", rendered);
                return;
            }
        }

        let cache = self.clone();
        let mut refreshes = self.lock_refreshes();
        // Reap finished refreshes so the set stays small in long-lived processes.
        while refreshes.try_join_next().is_some() {}
        refreshes.spawn(async move {
            match fetch().await {
                Ok(value) => {
                    let json = to_json(&rendered, &value);
                    drop(value);
                    if let Some(json) = json {
                        cache.write_json(&rendered, json, ttl).await;
                    }
                }
                Err(e) => warn!("Background refresh of {} failed: {}", rendered, e),
            }
            cache
                .refreshing
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&rendered);
        });
    }

    fn lock_refreshes(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.refreshes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write_json(&self, rendered: &str, json: Value, ttl: Duration) {
        let payload = json.to_string();
        self.memory.set(rendered, json, ttl);

        if let Err(e) = self.store.set(rendered, &payload).await {
            warn!("Failed to persist cache value for {}: {}", rendered, e);
            return;
        }
        let stamp = self.clock.now_ms().to_string();
        if let Err(e) = self.store.set(&timestamp_key(rendered), &stamp).await {
            warn!("Failed to persist cache timestamp for {}: {}", rendered, e);
        }
    }

    async fn load_durable<T: DeserializeOwned>(&self, rendered: &str) -> Option<(T, i64)> {
        let payload = match self.store.get(rendered).await {
            Ok(payload) => payload?,
            Err(e) => {
                warn!("Failed to read cached value for {}: {}", rendered, e);
                return None;
            }
        };

        let value = match serde_json::from_str::<T>(&payload) {
            Ok(value) => value,
            Err(e) => {
                debug!("Discarding undecodable cached value for {}: {}", rendered, e);
                return None;
            }
        };

        // A missing or garbled marker counts as infinitely old.
        let stored_at_ms = match self.store.get(&timestamp_key(rendered)).await {
            Ok(Some(stamp)) => stamp.trim().parse::<i64>().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!("Failed to read cache timestamp for {}: {}", rendered, e);
                0
            }
        };

        Some((value, stored_at_ms))
    }

    async fn remove_durable(&self, rendered: &str) {
        for key in [rendered.to_string(), timestamp_key(rendered)] {
            if let Err(e) = self.store.remove(&key).await {
                warn!("Failed to remove cached key {}: {}", key, e);
            }
        }
    }
}

fn to_json<T: Serialize>(rendered: &str, value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Failed to serialize cache value for {}: {}", rendered, e);
            None
        }
    }
}

fn timestamp_key(rendered: &str) -> String {
    format!("{}{}", rendered, TIMESTAMP_SUFFIX)
}
