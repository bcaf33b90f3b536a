use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use glob::Pattern;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::QnaError;
use crate::utils::config::{AppConfig, StorageKind};

pub type DynStore = Arc<dyn ObjectStore>;

/// File-level capability the local record store is written against.
///
/// Folders must be registered with [`FileStorage::add_root_folder`] before
/// they can be listed. File names are relative to their folder.
#[async_trait]
pub trait FileStorage: Send + Sync {
    async fn add_root_folder(&self, dir: &str, files_glob: &str) -> Result<(), QnaError>;

    async fn upsert_file(&self, dir: &str, name: &str, content: &str) -> Result<(), QnaError>;

    /// Fails with [`QnaError::NotFound`] when the file does not exist.
    async fn read_file(&self, dir: &str, name: &str) -> Result<String, QnaError>;

    /// Fails with [`QnaError::NotFound`] when the file does not exist.
    async fn delete_file(&self, dir: &str, name: &str) -> Result<(), QnaError>;

    /// Names of the files below `dir` ending with `suffix`, sorted.
    async fn directory_listing(&self, dir: &str, suffix: &str) -> Result<Vec<String>, QnaError>;
}

/// Storage manager over an `object_store` backend.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
    roots: Arc<RwLock<HashMap<String, Pattern>>>,
}

impl StorageManager {
    /// Create a new StorageManager with the specified configuration.
    ///
    /// For the local backend the data directory is created when missing.
    pub async fn new(cfg: &AppConfig) -> object_store::Result<Self> {
        let backend_kind = cfg.storage.clone();
        let (store, local_base) = create_storage_backend(cfg).await?;

        Ok(Self {
            store,
            backend_kind,
            local_base,
            roots: Arc::default(),
        })
    }

    /// Access the resolved local base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Store bytes at the specified location, replacing any previous object.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve bytes from the specified location.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    pub async fn delete(&self, location: &str) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        self.store.delete(&path).await
    }

    /// List all objects below the specified prefix.
    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }

    /// Names of all objects below `dir`, relative to it.
    pub async fn relative_names(&self, dir: &str) -> object_store::Result<Vec<String>> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut names: Vec<String> = self
            .list(Some(dir))
            .await?
            .into_iter()
            .filter_map(|meta| {
                meta.location
                    .as_ref()
                    .strip_prefix(prefix.as_str())
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl FileStorage for StorageManager {
    async fn add_root_folder(&self, dir: &str, files_glob: &str) -> Result<(), QnaError> {
        ensure_relative(dir)?;
        let pattern = Pattern::new(files_glob).map_err(|e| {
            QnaError::InvalidEntry(format!("invalid files glob '{files_glob}': {e}"))
        })?;

        if matches!(self.backend_kind, StorageKind::Local) {
            if let Some(base) = &self.local_base {
                tokio::fs::create_dir_all(base.join(dir)).await?;
            }
        }

        self.roots.write().await.insert(dir.to_string(), pattern);
        info!(folder = %dir, glob = %files_glob, "Registered storage folder");
        Ok(())
    }

    async fn upsert_file(&self, dir: &str, name: &str, content: &str) -> Result<(), QnaError> {
        let location = file_location(dir, name)?;
        self.put(&location, Bytes::from(content.to_owned())).await?;
        debug!(location = %location, "Upserted file");
        Ok(())
    }

    async fn read_file(&self, dir: &str, name: &str) -> Result<String, QnaError> {
        let location = file_location(dir, name)?;
        let bytes = self.get(&location).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    async fn delete_file(&self, dir: &str, name: &str) -> Result<(), QnaError> {
        let location = file_location(dir, name)?;
        // In-memory stores accept deleting absent objects, the filesystem does not.
        if !self.exists(&location).await? {
            return Err(QnaError::NotFound(location));
        }
        self.delete(&location).await?;
        debug!(location = %location, "Deleted file");
        Ok(())
    }

    async fn directory_listing(&self, dir: &str, suffix: &str) -> Result<Vec<String>, QnaError> {
        let pattern = self
            .roots
            .read()
            .await
            .get(dir)
            .cloned()
            .ok_or_else(|| QnaError::NotInitialized(format!("folder '{dir}' is not registered")))?;

        let names = self.relative_names(dir).await?;
        Ok(names
            .into_iter()
            .filter(|name| name.ends_with(suffix) && pattern.matches(name))
            .collect())
    }
}

/// Reject absolute paths and traversal components.
fn ensure_relative(location: &str) -> Result<(), QnaError> {
    let relative = Path::new(location);
    let unsupported = location.is_empty()
        || relative.is_absolute()
        || relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::CurDir | Component::Prefix(_) | Component::RootDir
            )
        });

    if unsupported {
        return Err(QnaError::InvalidEntry(format!(
            "unsupported storage location '{location}'"
        )));
    }
    Ok(())
}

fn file_location(dir: &str, name: &str) -> Result<String, QnaError> {
    ensure_relative(dir)?;
    ensure_relative(name)?;
    Ok(format!("{}/{}", dir.trim_end_matches('/'), name))
}

async fn create_storage_backend(
    cfg: &AppConfig,
) -> object_store::Result<(DynStore, Option<PathBuf>)> {
    match cfg.storage {
        StorageKind::Local => {
            let base = PathBuf::from(&cfg.data_dir);
            if !base.exists() {
                tokio::fs::create_dir_all(&base).await.map_err(|e| {
                    object_store::Error::Generic {
                        store: "LocalFileSystem",
                        source: e.into(),
                    }
                })?;
            }
            let store = LocalFileSystem::new_with_prefix(base.clone())?;
            Ok((Arc::new(store), Some(base)))
        }
        StorageKind::Memory => {
            let store = InMemory::new();
            Ok((Arc::new(store), None))
        }
    }
}

/// Testing utilities for storage operations.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing {
    use super::*;
    use tempfile::TempDir;

    /// Create a test configuration with memory storage.
    pub fn test_config_memory() -> AppConfig {
        AppConfig {
            storage: StorageKind::Memory,
            data_dir: "/tmp/unused".into(), // Ignored for memory storage
            ..Default::default()
        }
    }

    /// Create a test configuration with local storage rooted at `data_dir`.
    pub fn test_config_local(data_dir: &Path) -> AppConfig {
        AppConfig {
            storage: StorageKind::Local,
            data_dir: data_dir.to_string_lossy().into_owned(),
            ..Default::default()
        }
    }

    /// A StorageManager bundled with the temporary directory backing it.
    ///
    /// The directory is removed when the manager is dropped.
    pub struct TestStorageManager {
        storage: StorageManager,
        _temp_dir: Option<TempDir>,
    }

    impl TestStorageManager {
        pub async fn new_memory() -> object_store::Result<Self> {
            let storage = StorageManager::new(&test_config_memory()).await?;
            Ok(Self {
                storage,
                _temp_dir: None,
            })
        }

        pub async fn new_local() -> object_store::Result<Self> {
            let temp_dir = TempDir::new().map_err(|e| object_store::Error::Generic {
                store: "LocalFileSystem",
                source: e.into(),
            })?;
            let storage = StorageManager::new(&test_config_local(temp_dir.path())).await?;
            Ok(Self {
                storage,
                _temp_dir: Some(temp_dir),
            })
        }

        pub fn storage(&self) -> &StorageManager {
            &self.storage
        }

        pub fn clone_storage(&self) -> StorageManager {
            self.storage.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::TestStorageManager;
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn listing_requires_registered_folder() {
        let test = TestStorageManager::new_memory().await.unwrap();
        let err = test
            .storage()
            .directory_listing("qna", ".json")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn listing_filters_by_suffix_and_glob() {
        let test = TestStorageManager::new_memory().await.unwrap();
        let storage = test.storage();
        storage.add_root_folder("qna", "**/*.json").await.unwrap();

        storage.upsert_file("qna", "b.json", "{}").await.unwrap();
        storage.upsert_file("qna", "a.json", "{}").await.unwrap();
        storage.upsert_file("qna", "notes.txt", "hi").await.unwrap();
        storage.upsert_file("other", "c.json", "{}").await.unwrap();

        let names = storage.directory_listing("qna", ".json").await.unwrap();
        assert_eq!(names, vec!["a.json".to_string(), "b.json".to_string()]);
    }

    #[tokio::test]
    async fn local_backend_round_trips_files() {
        let test = TestStorageManager::new_local().await.unwrap();
        let storage = test.storage();
        storage.add_root_folder("qna", "**/*.json").await.unwrap();

        let base = storage.local_base_path().unwrap();
        assert!(base.join("qna").is_dir());

        storage
            .upsert_file("qna", "entry.json", "{\"id\":1}")
            .await
            .unwrap();
        assert_eq!(
            storage.read_file("qna", "entry.json").await.unwrap(),
            "{\"id\":1}"
        );

        storage.delete_file("qna", "entry.json").await.unwrap();
        let err = storage.read_file("qna", "entry.json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn deleting_missing_file_is_not_found_on_every_backend() {
        for test in [
            TestStorageManager::new_memory().await.unwrap(),
            TestStorageManager::new_local().await.unwrap(),
        ] {
            let err = test
                .storage()
                .delete_file("qna", "missing.json")
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
    }

    #[tokio::test]
    async fn traversal_outside_folder_is_rejected() {
        let test = TestStorageManager::new_memory().await.unwrap();
        let storage = test.storage();

        let err = storage
            .upsert_file("qna", "../escape.json", "{}")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEntry);

        let err = storage.add_root_folder("/etc", "*").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEntry);
    }
}
