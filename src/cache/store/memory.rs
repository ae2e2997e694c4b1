//! In-memory durable store for single-process operation.
//!
//! Contents are lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DurableStore, StoreResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.values.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.values.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let values = self.values.read().await;
        let mut keys: Vec<String> = values
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let store = MemoryStore::new();
        store.set("profile:a", "1").await.unwrap();
        store.set("profile:a#ts", "2").await.unwrap();
        store.set("track:a", "3").await.unwrap();

        let keys = store.keys_with_prefix("profile:").await.unwrap();
        assert_eq!(keys, vec!["profile:a", "profile:a#ts"]);
    }
}
