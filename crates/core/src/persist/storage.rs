use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

/// One named entry per aggregate, written as a single bundle per flush.
pub type SaveBundle = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },
    #[error("storage io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage format failure at {path}: {message}")]
    Format { path: PathBuf, message: String },
}

/// Asynchronous, fallible key/value store for save bundles. The save
/// pipeline serializes its own calls; implementations are not required to
/// tolerate overlapping writes.
///
/// `save` upserts the bundle's entries; keys absent from the bundle are
/// left untouched. `load` returns only the requested keys that exist.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn initialize(&self) -> Result<(), StorageError>;

    async fn load(&self, keys: &[&str]) -> Result<SaveBundle, StorageError>;

    async fn save(&self, bundle: SaveBundle) -> Result<(), StorageError>;
}

/// In-memory backend for tests and headless demos.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<SaveBundle>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn entry_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load(&self, keys: &[&str]) -> Result<SaveBundle, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(keys
            .iter()
            .filter_map(|key| {
                entries
                    .get(*key)
                    .map(|value| ((*key).to_string(), value.clone()))
            })
            .collect())
    }

    async fn save(&self, bundle: SaveBundle) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.extend(bundle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_storage_load_returns_only_requested_present_keys() {
        let storage = MemoryStorage::new();
        storage
            .save(SaveBundle::from([
                ("settings".to_string(), "a".to_string()),
                ("resources".to_string(), "b".to_string()),
            ]))
            .await
            .expect("save");

        let loaded = storage.load(&["settings", "missing"]).await.expect("load");

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("settings").map(String::as_str), Some("a"));
    }

    #[tokio::test]
    async fn memory_storage_save_upserts_without_dropping_other_keys() {
        let storage = MemoryStorage::new();
        storage
            .save(SaveBundle::from([("settings".to_string(), "a".to_string())]))
            .await
            .expect("save");
        storage
            .save(SaveBundle::from([(
                "resources".to_string(),
                "b".to_string(),
            )]))
            .await
            .expect("save");

        assert_eq!(storage.entry_count(), 2);
        assert_eq!(storage.entry("settings").as_deref(), Some("a"));
    }
}
