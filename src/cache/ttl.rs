//! In-memory map with per-entry expiry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at_ms: i64,
}

/// Values keyed by string, each with its own time-to-live.
///
/// An entry read at or after its expiry is a miss even while it is still
/// stored.
pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| now < entry.expires_at_ms)
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = self.clock.now_ms().saturating_add(ttl_ms);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at_ms,
            },
        );
    }

    /// Remove one key. Returns whether anything was stored under it.
    pub fn remove(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    /// Remove every key matching `predicate`. Returns how many were removed.
    pub fn remove_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Drop entries that have expired (housekeeping).
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at_ms);
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
