//! [`FileStorage`] adapters: a local-disk store and an in-memory one.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::ports::FileStorage;

/// Rejects keys that are absolute or climb out of their root.
fn checked_key(key: &str) -> Result<&Path, AppError> {
    let path = Path::new(key);
    if key.is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(AppError::Validation(format!("invalid storage path: {key}")));
    }
    Ok(path)
}

fn expiry_query(ttl: Duration) -> String {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
    format!("expires={}", (Utc::now() + ttl).timestamp())
}

/// Stores objects under a directory tree.
///
/// Private objects live directly under `root`; uploads go to
/// `root/temp_dir` and are promoted into `root/public_dir`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    config: StorageConfig,
}

impl LocalFileStorage {
    /// Creates a store over `config`. Directories are created lazily.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    fn private_path(&self, key: &str) -> Result<PathBuf, AppError> {
        Ok(self.config.root.join(checked_key(key)?))
    }

    fn temp_path(&self, key: &str) -> Result<PathBuf, AppError> {
        Ok(self
            .config
            .root
            .join(&self.config.temp_dir)
            .join(checked_key(key)?))
    }

    fn public_path(&self, key: &str) -> Result<PathBuf, AppError> {
        Ok(self
            .config
            .root
            .join(&self.config.public_dir)
            .join(checked_key(key)?))
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            key
        )
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AppError::upstream("storage", e))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| AppError::upstream("storage", e))
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<(), AppError> {
        write_file(&self.private_path(path)?, bytes).await
    }

    async fn put_temp(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), AppError> {
        write_file(&self.temp_path(key)?, bytes).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, AppError> {
        match tokio::fs::read(self.private_path(path)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found("file", path))
            }
            Err(e) => Err(AppError::upstream("storage", e)),
        }
    }

    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String, AppError> {
        let full = self.private_path(path)?;
        if !tokio::fs::try_exists(&full)
            .await
            .map_err(|e| AppError::upstream("storage", e))?
        {
            return Err(AppError::not_found("file", path));
        }
        Ok(format!("file://{}?{}", full.display(), expiry_query(ttl)))
    }

    async fn promote(&self, key: &str) -> Result<String, AppError> {
        let from = self.temp_path(key)?;
        let to = self.public_path(key)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::upstream("storage", e))?;
        }
        match tokio::fs::rename(&from, &to).await {
            Ok(()) => Ok(self.public_url(key)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::not_found("upload", key))
            }
            Err(e) => Err(AppError::upstream("storage", e)),
        }
    }
}

#[derive(Debug, Default)]
struct Objects {
    private: HashMap<String, Vec<u8>>,
    temp: HashMap<String, Vec<u8>>,
    public: HashMap<String, Vec<u8>>,
}

/// Keeps objects in memory. Used by tests and database-less local runs.
#[derive(Debug, Default)]
pub struct MemoryFileStorage {
    objects: Mutex<Objects>,
}

impl MemoryFileStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the private object at `path`, if any.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .private
            .get(path)
            .cloned()
    }

    /// Returns `true` if a promoted public object exists at `key`.
    #[must_use]
    pub fn is_public(&self, key: &str) -> bool {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .public
            .contains_key(key)
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<(), AppError> {
        checked_key(path)?;
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .private
            .insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn put_temp(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<(), AppError> {
        checked_key(key)?;
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .temp
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, AppError> {
        self.get(path)
            .ok_or_else(|| AppError::not_found("file", path))
    }

    async fn presign_get(&self, path: &str, ttl: Duration) -> Result<String, AppError> {
        if self.get(path).is_none() {
            return Err(AppError::not_found("file", path));
        }
        Ok(format!("memory://{path}?{}", expiry_query(ttl)))
    }

    async fn promote(&self, key: &str) -> Result<String, AppError> {
        let mut objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(bytes) = objects.temp.remove(key) else {
            return Err(AppError::not_found("upload", key));
        };
        objects.public.insert(key.to_string(), bytes);
        Ok(format!("memory://public/{key}"))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_root() {
        assert!(checked_key("lib/exports/a.csv").is_ok());
        assert!(checked_key("../etc/passwd").is_err());
        assert!(checked_key("/abs").is_err());
        assert!(checked_key("").is_err());
    }

    #[tokio::test]
    async fn promote_moves_temp_upload_to_public() {
        let storage = MemoryFileStorage::new();
        assert!(storage.put_temp("abcd1234-1/c.png", b"png", "image/png").await.is_ok());
        let Ok(url) = storage.promote("abcd1234-1/c.png").await else {
            panic!("promote should succeed");
        };
        assert!(url.ends_with("abcd1234-1/c.png"));
        assert!(storage.is_public("abcd1234-1/c.png"));
        assert!(matches!(
            storage.promote("abcd1234-1/c.png").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn local_storage_round_trips_private_objects() {
        let root = std::env::temp_dir().join(format!("librarium-test-{}", uuid::Uuid::new_v4()));
        let storage = LocalFileStorage::new(StorageConfig {
            root: root.clone(),
            temp_dir: "tmp".into(),
            public_dir: "public".into(),
            public_base_url: "http://cdn.test/".into(),
        });
        assert!(storage.put("lib/exports/x.csv", b"a,b\n", "text/csv").await.is_ok());
        let Ok(bytes) = storage.read("lib/exports/x.csv").await else {
            panic!("read should succeed");
        };
        assert_eq!(bytes, b"a,b\n");

        assert!(storage.put_temp("u-1/cover.png", b"img", "image/png").await.is_ok());
        let Ok(url) = storage.promote("u-1/cover.png").await else {
            panic!("promote should succeed");
        };
        assert_eq!(url, "http://cdn.test/u-1/cover.png");

        let _ = tokio::fs::remove_dir_all(root).await;
    }
}
