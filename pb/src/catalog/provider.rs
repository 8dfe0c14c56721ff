//! Component catalog providers

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ComponentCatalog;

/// Source of the current component catalog
///
/// Fails with a transport/auth error when the remote source cannot be read.
#[async_trait]
pub trait ComponentsProvider: Send + Sync {
    async fn get_components(&self) -> Result<ComponentCatalog>;
}

/// A catalog is its own (static) provider
#[async_trait]
impl ComponentsProvider for ComponentCatalog {
    async fn get_components(&self) -> Result<ComponentCatalog> {
        Ok(self.clone())
    }
}

/// Reads the catalog from a YAML or JSON file on every call
pub struct FileComponentsProvider {
    path: PathBuf,
}

impl FileComponentsProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ComponentsProvider for FileComponentsProvider {
    async fn get_components(&self) -> Result<ComponentCatalog> {
        debug!(path = ?self.path, "FileComponentsProvider::get_components: called");
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || ComponentCatalog::from_file(path))
            .await
            .context("Catalog reader task failed")?
    }
}

/// Caches another provider in memory and, optionally, in a JSON file
///
/// The first call reads the disk cache unless `refresh` is set, then falls
/// back to the inner provider and rewrites the cache file. Later calls are
/// served from memory.
pub struct CachedComponentsProvider {
    inner: Arc<dyn ComponentsProvider>,
    cache_file: Option<PathBuf>,
    refresh: bool,
    memory: Mutex<Option<ComponentCatalog>>,
}

impl CachedComponentsProvider {
    /// Cache file name inside the cache directory
    pub const CACHE_FILE: &'static str = "components.json";

    pub fn new(inner: Arc<dyn ComponentsProvider>, cache_dir: Option<PathBuf>, refresh: bool) -> Self {
        debug!(?cache_dir, %refresh, "CachedComponentsProvider::new: called");
        Self {
            inner,
            cache_file: cache_dir.map(|d| d.join(Self::CACHE_FILE)),
            refresh,
            memory: Mutex::new(None),
        }
    }

    async fn read_cache_file(&self) -> Option<ComponentCatalog> {
        let path = self.cache_file.as_ref()?;
        if self.refresh {
            return None;
        }
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable catalog cache {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(catalog) => {
                info!("Loaded component catalog from cache {}", path.display());
                Some(catalog)
            }
            Err(e) => {
                warn!("Ignoring corrupt catalog cache {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn write_cache_file(&self, catalog: &ComponentCatalog) -> Result<()> {
        let Some(path) = self.cache_file.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context(format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(catalog)?;
        tokio::fs::write(path, json)
            .await
            .context(format!("Failed to write catalog cache {}", path.display()))?;
        debug!(?path, "write_cache_file: cache written");
        Ok(())
    }
}

#[async_trait]
impl ComponentsProvider for CachedComponentsProvider {
    async fn get_components(&self) -> Result<ComponentCatalog> {
        debug!("CachedComponentsProvider::get_components: called");
        let mut memory = self.memory.lock().await;
        if let Some(catalog) = memory.as_ref() {
            debug!("CachedComponentsProvider::get_components: memory hit");
            return Ok(catalog.clone());
        }

        let catalog = match self.read_cache_file().await {
            Some(catalog) => catalog,
            None => {
                let catalog = self.inner.get_components().await?;
                if let Err(e) = self.write_cache_file(&catalog).await {
                    warn!("Failed to cache component catalog: {:#}", e);
                }
                catalog
            }
        };

        *memory = Some(catalog.clone());
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Component;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingProvider {
        catalog: ComponentCatalog,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(names: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                catalog: ComponentCatalog::new(names.iter().map(|n| Component::new(*n)).collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ComponentsProvider for CountingProvider {
        async fn get_components(&self) -> Result<ComponentCatalog> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.catalog.clone())
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl ComponentsProvider for FailingProvider {
        async fn get_components(&self) -> Result<ComponentCatalog> {
            Err(eyre::eyre!("401 Unauthorized"))
        }
    }

    #[tokio::test]
    async fn test_static_catalog_provider() {
        let catalog = ComponentCatalog::new(vec![Component::new("Hero")]);
        assert_eq!(catalog.get_components().await.unwrap(), catalog);
    }

    #[tokio::test]
    async fn test_file_provider() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("components.yml");
        std::fs::write(&path, "- name: Hero\n- name: Footer\n").unwrap();

        let provider = FileComponentsProvider::new(&path);
        let catalog = provider.get_components().await.unwrap();
        assert_eq!(catalog.names(), vec!["Hero", "Footer"]);
    }

    #[tokio::test]
    async fn test_cached_provider_memoizes() {
        let inner = CountingProvider::new(&["Hero"]);
        let cached = CachedComponentsProvider::new(inner.clone(), None, false);

        cached.get_components().await.unwrap();
        cached.get_components().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_provider_reuses_disk_cache() {
        let dir = TempDir::new().unwrap();
        let inner = CountingProvider::new(&["Hero", "Footer"]);

        let first = CachedComponentsProvider::new(inner.clone(), Some(dir.path().to_path_buf()), false);
        first.get_components().await.unwrap();
        assert!(dir.path().join(CachedComponentsProvider::CACHE_FILE).exists());

        let second = CachedComponentsProvider::new(inner.clone(), Some(dir.path().to_path_buf()), false);
        let catalog = second.get_components().await.unwrap();
        assert_eq!(catalog.names(), vec!["Hero", "Footer"]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_provider_refresh_bypasses_disk() {
        let dir = TempDir::new().unwrap();
        let inner = CountingProvider::new(&["Hero"]);

        CachedComponentsProvider::new(inner.clone(), Some(dir.path().to_path_buf()), false)
            .get_components()
            .await
            .unwrap();
        CachedComponentsProvider::new(inner.clone(), Some(dir.path().to_path_buf()), true)
            .get_components()
            .await
            .unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_provider_replaces_corrupt_cache() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("nested").join(CachedComponentsProvider::CACHE_FILE);
        std::fs::create_dir_all(cache.parent().unwrap()).unwrap();
        std::fs::write(&cache, "{ not json").unwrap();

        let inner = CountingProvider::new(&["Hero"]);
        let cached = CachedComponentsProvider::new(inner.clone(), cache.parent().map(PathBuf::from), false);
        let catalog = cached.get_components().await.unwrap();
        assert_eq!(catalog.names(), vec!["Hero"]);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        let rewritten = ComponentCatalog::from_file(&cache).unwrap();
        assert_eq!(rewritten, catalog);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cached_provider_shares_one_fetch_on_a_single_thread() {
        let dir = TempDir::new().unwrap();
        let inner = CountingProvider::new(&["Hero", "Footer"]);
        let cached = Arc::new(CachedComponentsProvider::new(
            inner.clone(),
            Some(dir.path().join("cache")),
            false,
        ));

        let (a, b) = tokio::join!(cached.get_components(), cached.get_components());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("cache").join(CachedComponentsProvider::CACHE_FILE).exists());
    }

    #[tokio::test]
    async fn test_cached_provider_propagates_errors() {
        let cached = CachedComponentsProvider::new(Arc::new(FailingProvider), None, false);
        let err = cached.get_components().await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
