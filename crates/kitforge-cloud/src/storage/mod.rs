//! Where finished archives live after generation.
//!
//! [`ArchiveStorage`] hides the backend behind a [`StorageHandle`] recorded in
//! the ledger. Object storage is the production backend; local storage keeps
//! the archive on the generating machine and is refused in production.

mod local;
mod object;

pub use local::LocalStorage;
pub use object::ObjectStorage;

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use kitforge_core::config::{Environment, StorageSettings};
use kitforge_core::ledger::{StorageBackendKind, StorageHandle};
use std::path::Path;
use std::sync::Arc;

#[async_trait]
pub trait ArchiveStorage: Send + Sync {
    fn kind(&self) -> StorageBackendKind;

    /// Take ownership of a finished archive and return where it now lives.
    async fn store(&self, archive_path: &Path) -> StorageResult<StorageHandle>;

    /// A location the archive can be downloaded from, or `None` when it is
    /// gone.
    async fn resolve(&self, handle: &StorageHandle) -> StorageResult<Option<String>>;

    /// The archive bytes.
    async fn fetch(&self, handle: &StorageHandle) -> StorageResult<Vec<u8>>;

    /// Remove the archive. Removing an absent archive succeeds.
    async fn discard(&self, handle: &StorageHandle) -> StorageResult<()>;
}

/// Build the configured backend.
pub async fn create_storage(
    settings: &StorageSettings,
    environment: Environment,
) -> StorageResult<Arc<dyn ArchiveStorage>> {
    match settings.backend {
        StorageBackendKind::Object => {
            let storage = ObjectStorage::from_settings(settings).await?;
            Ok(Arc::new(storage))
        }
        StorageBackendKind::Local if environment.is_production() => Err(StorageError::Config(
            "local archive storage is not allowed in production".into(),
        )),
        StorageBackendKind::Local => Ok(Arc::new(LocalStorage::new())),
    }
}

fn expect_backend(handle: &StorageHandle, expected: StorageBackendKind) -> StorageResult<()> {
    if handle.backend != expected {
        return Err(StorageError::WrongBackend {
            expected: expected.to_string(),
            found: handle.backend.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_backend_is_refused_in_production() {
        let settings = StorageSettings::default();
        assert_eq!(settings.backend, StorageBackendKind::Local);

        let err = create_storage(&settings, Environment::Production)
            .await
            .err()
            .expect("production must refuse local storage");
        assert!(matches!(err, StorageError::Config(_)));

        let storage = create_storage(&settings, Environment::Development)
            .await
            .unwrap();
        assert_eq!(storage.kind(), StorageBackendKind::Local);
    }

    #[tokio::test]
    async fn object_backend_requires_a_bucket() {
        let settings = StorageSettings {
            backend: StorageBackendKind::Object,
            ..StorageSettings::default()
        };
        let err = create_storage(&settings, Environment::Production)
            .await
            .err()
            .expect("missing bucket");
        assert!(matches!(err, StorageError::Config(_)));
    }
}
