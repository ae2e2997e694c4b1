//! Pluggable durable key-value stores backing the cache across restarts.
//!
//! - In-memory (tests, ephemeral runs)
//! - JSON file (single instance, persisted)
//! - Redis (shared between instances, requires `redis-backend`)

mod file;
mod memory;
#[cfg(feature = "redis-backend")]
mod redis;

pub use file::JsonFileStore;
pub use memory::MemoryStore;
#[cfg(feature = "redis-backend")]
pub use self::redis::RedisStore;

use async_trait::async_trait;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from durable store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// String-keyed get/set/remove store with no transactions.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// All stored keys starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}
