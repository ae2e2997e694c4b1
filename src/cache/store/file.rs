//! JSON file store for persistence across restarts on a single machine.
//!
//! The whole map is rewritten on every change through a temporary file and
//! a rename, so a crash never leaves a half-written file behind.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{DurableStore, StoreResult};

pub struct JsonFileStore {
    path: PathBuf,
    /// Loaded lazily on first access.
    values: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(values) => Ok(values),
                Err(e) => {
                    warn!(
                        "Cache file {} is unreadable ({}), starting empty",
                        self.path.display(),
                        e
                    );
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache file {} does not exist yet", self.path.display());
                Ok(BTreeMap::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, values: &BTreeMap<String, String>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string(values)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut guard = self.values.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard.as_ref().and_then(|values| values.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut guard = self.values.lock().await;
        let mut values = match guard.take() {
            Some(values) => values,
            None => self.load().await?,
        };
        values.insert(key.to_string(), value.to_string());
        let result = self.persist(&values).await;
        *guard = Some(values);
        result
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        let mut guard = self.values.lock().await;
        let mut values = match guard.take() {
            Some(values) => values,
            None => self.load().await?,
        };
        let result = if values.remove(key).is_some() {
            self.persist(&values).await
        } else {
            Ok(())
        };
        *guard = Some(values);
        result
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut guard = self.values.lock().await;
        if guard.is_none() {
            *guard = Some(self.load().await?);
        }
        Ok(guard
            .as_ref()
            .map(|values| {
                values
                    .keys()
                    .filter(|k| k.starts_with(prefix))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }
}
