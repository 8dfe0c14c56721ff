//! Storage sinks for generated results

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info};

/// Key-value sink for JSON documents
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `value` under `key`, replacing any previous value
    async fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// One pretty-printed JSON file per key under a base directory
///
/// A key may contain `/` to place the file in a sub-directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty() && relative.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(eyre!("Invalid storage key: '{}'", key));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        debug!(%key, dir = %self.dir.display(), "FileStorage::save: called");
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(value).context("Failed to serialize value")?;
        tokio::fs::write(&path, content)
            .await
            .context(format!("Failed to write {}", path.display()))?;

        info!("Saved {} to {}", key, path.display());
        Ok(())
    }
}

/// In-memory storage, mainly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    /// Snapshot of all stored entries
    pub fn saved(&self) -> BTreeMap<String, Value> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        debug!(%key, "MemoryStorage::save: called");
        self.entries
            .lock()
            .map_err(|_| eyre!("Memory storage lock poisoned"))?
            .insert(key.to_string(), value.clone());
        Ok(())
    }
}
