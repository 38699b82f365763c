use super::{expect_backend, ArchiveStorage};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use kitforge_core::ledger::{StorageBackendKind, StorageHandle};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Archives stay where the generator wrote them; the handle is the absolute
/// path.
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArchiveStorage for LocalStorage {
    fn kind(&self) -> StorageBackendKind {
        StorageBackendKind::Local
    }

    async fn store(&self, archive_path: &Path) -> StorageResult<StorageHandle> {
        let absolute = fs::canonicalize(archive_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::NotFound(archive_path.display().to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        debug!(path = %absolute.display(), "archive kept on local disk");
        Ok(StorageHandle {
            backend: StorageBackendKind::Local,
            key: absolute.to_string_lossy().into_owned(),
        })
    }

    async fn resolve(&self, handle: &StorageHandle) -> StorageResult<Option<String>> {
        expect_backend(handle, StorageBackendKind::Local)?;
        match fs::metadata(&handle.key).await {
            Ok(meta) if meta.is_file() => Ok(Some(handle.key.clone())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, handle: &StorageHandle) -> StorageResult<Vec<u8>> {
        expect_backend(handle, StorageBackendKind::Local)?;
        match fs::read(&handle.key).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(handle.key.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard(&self, handle: &StorageHandle) -> StorageResult<()> {
        expect_backend(handle, StorageBackendKind::Local)?;
        match fs::remove_file(&handle.key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn store_resolve_fetch_discard() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("acme-site-1a2b3c4d.zip");
        std::fs::write(&archive, b"PK fake").unwrap();

        let storage = LocalStorage::new();
        let handle = storage.store(&archive).await.unwrap();
        assert_eq!(handle.backend, StorageBackendKind::Local);
        assert!(Path::new(&handle.key).is_absolute());

        assert_eq!(storage.resolve(&handle).await.unwrap(), Some(handle.key.clone()));
        assert_eq!(storage.fetch(&handle).await.unwrap(), b"PK fake");

        storage.discard(&handle).await.unwrap();
        assert!(!archive.exists());
        assert_eq!(storage.resolve(&handle).await.unwrap(), None);
        assert!(matches!(
            storage.fetch(&handle).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn discard_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let handle = StorageHandle {
            backend: StorageBackendKind::Local,
            key: dir.path().join("gone.zip").to_string_lossy().into_owned(),
        };
        let storage = LocalStorage::new();
        storage.discard(&handle).await.unwrap();
        storage.discard(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn store_missing_archive_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = LocalStorage::new()
            .store(&dir.path().join("missing.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn object_handles_are_rejected() {
        let handle = StorageHandle {
            backend: StorageBackendKind::Object,
            key: "builds/a.zip".into(),
        };
        let err = LocalStorage::new().resolve(&handle).await.unwrap_err();
        assert!(matches!(err, StorageError::WrongBackend { .. }));
    }
}
